use std::collections::HashMap;

use crate::SessionId;

/// Whether a participant's audio is reaching us
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MuteState {
    /// No audio observed yet
    #[default]
    Unknown,
    Live,
    Muted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: SessionId,
    pub name: String,
    pub is_self: bool,
    pub mute: MuteState,
}

/// Display projection of the room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterView {
    pub entries: Vec<RosterEntry>,
}

impl RosterView {
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, id: &str) -> Option<&RosterEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}

/// Names in arrival order plus the observed mute state of remotes
#[derive(Debug, Default)]
pub struct Roster {
    names: Vec<(SessionId, String)>,
    mute: HashMap<SessionId, MuteState>,
}

impl Roster {
    pub fn reset(&mut self) {
        self.names.clear();
        self.mute.clear();
    }

    /// Add a participant, or rename one already listed without moving it
    pub fn insert(&mut self, id: &str, name: &str) {
        match self.names.iter_mut().find(|(known, _)| known == id) {
            Some((_, known)) => *known = name.to_owned(),
            None => self.names.push((id.to_owned(), name.to_owned())),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<String> {
        self.mute.remove(id);
        let index = self.names.iter().position(|(known, _)| known == id)?;
        Some(self.names.remove(index).1)
    }

    pub fn name(&self, id: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|(known, _)| known == id)
            .map(|(_, name)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Record observed mute state. Once known it never goes back to unknown.
    pub fn set_mute(&mut self, id: &str, state: MuteState) {
        if state == MuteState::Unknown {
            return;
        }
        self.mute.insert(id.to_owned(), state);
    }

    pub fn mute(&self, id: &str) -> MuteState {
        self.mute.get(id).copied().unwrap_or_default()
    }

    /// Project the roster for display. The local entry's state follows the
    /// microphone switch rather than anything observed.
    pub fn view(&self, self_id: Option<&str>, microphone_enabled: bool) -> RosterView {
        let entries = self
            .names
            .iter()
            .map(|(id, name)| {
                let is_self = Some(id.as_str()) == self_id;
                let mute = if is_self {
                    if microphone_enabled {
                        MuteState::Live
                    } else {
                        MuteState::Muted
                    }
                } else {
                    self.mute(id)
                };
                RosterEntry {
                    id: id.clone(),
                    name: name.clone(),
                    is_self,
                    mute,
                }
            })
            .collect();

        RosterView { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_arrival_order() {
        let mut roster = Roster::default();
        roster.insert("me", "Ada");
        roster.insert("b", "Bob");
        roster.insert("c", "Cy");
        roster.insert("b", "Bobby");

        let view = roster.view(Some("me"), true);
        let names: Vec<_> = view.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Bobby", "Cy"]);
        assert_eq!(view.count(), 3);
        assert!(view.entries[0].is_self);
    }

    #[test]
    fn remote_mute_never_returns_to_unknown() {
        let mut roster = Roster::default();
        roster.insert("b", "Bob");
        assert_eq!(roster.mute("b"), MuteState::Unknown);

        roster.set_mute("b", MuteState::Live);
        roster.set_mute("b", MuteState::Unknown);
        assert_eq!(roster.mute("b"), MuteState::Live);

        roster.set_mute("b", MuteState::Muted);
        assert_eq!(roster.view(None, true).entries[0].mute, MuteState::Muted);
    }

    #[test]
    fn self_entry_follows_microphone() {
        let mut roster = Roster::default();
        roster.insert("me", "Ada");
        assert_eq!(roster.view(Some("me"), true).entries[0].mute, MuteState::Live);
        assert_eq!(roster.view(Some("me"), false).entries[0].mute, MuteState::Muted);
    }

    #[test]
    fn removal_forgets_mute_state() {
        let mut roster = Roster::default();
        roster.insert("b", "Bob");
        roster.set_mute("b", MuteState::Muted);

        assert_eq!(roster.remove("b").as_deref(), Some("Bob"));
        assert!(roster.remove("b").is_none());
        roster.insert("b", "Bob");
        assert_eq!(roster.mute("b"), MuteState::Unknown);
    }
}
