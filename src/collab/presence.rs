use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const OWNER_ROLE: &str = "owner";
pub const DEFAULT_ROLE: &str = "collaborator";
pub const ACCEPTED_STATUS: &str = "accepted";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn name(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.username.as_deref())
    }
}

/// A participant of the project as shown in the collaborator list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: String,
    pub user: Option<UserProfile>,
    pub role: String,
    pub status: String,
}

impl Collaborator {
    pub fn name(&self) -> Option<&str> {
        self.user.as_ref().and_then(UserProfile::name)
    }
}

/// Presence entry as sent by the server. `userId` is either an id or a populated user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawCollaborator {
    pub user_id: Option<Value>,
    pub user: Option<UserProfile>,
    pub role: Option<String>,
    pub status: Option<String>,
}

impl RawCollaborator {
    /// Entries without a usable user id are dropped.
    pub fn into_collaborator(self) -> Option<Collaborator> {
        let (user_id, embedded) = match self.user_id? {
            Value::String(id) => (id, None),
            user @ Value::Object(_) => {
                let id = user
                    .get("_id")
                    .or(user.get("id"))
                    .and_then(Value::as_str)?
                    .to_string();
                let profile = serde_json::from_value::<UserProfile>(user).ok();
                (id, profile)
            }
            _ => return None,
        };
        if user_id.is_empty() {
            return None;
        }
        Some(Collaborator {
            user_id,
            user: self.user.or(embedded),
            role: self.role.unwrap_or_else(|| DEFAULT_ROLE.into()),
            status: self.status.unwrap_or_else(|| ACCEPTED_STATUS.into()),
        })
    }
}

/// Someone taking part in the session from this client's point of view.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub user_id: String,
    pub profile: Option<UserProfile>,
}

impl Participant {
    pub fn new(user_id: &str, display_name: Option<&str>) -> Self {
        Self {
            user_id: user_id.into(),
            profile: display_name.map(|name| UserProfile {
                display_name: Some(name.into()),
                ..Default::default()
            }),
        }
    }
}

/// Who this client is and who owns the project.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    pub owner: Participant,
    pub current_user: Participant,
}

/// Union of the remote list with the owner and the current user, which presence payloads may
/// omit. Owner first, then the current user, then the others in arrival order without
/// duplicates.
pub fn normalize_collaborators(
    remote: Vec<Collaborator>,
    identity: &LocalIdentity,
) -> Vec<Collaborator> {
    let find = |user_id: &str| remote.iter().find(|c| c.user_id == user_id).cloned();

    let owner_id = identity.owner.user_id.as_str();
    let mut owner = find(owner_id).unwrap_or_else(|| Collaborator {
        user_id: owner_id.into(),
        user: None,
        role: OWNER_ROLE.into(),
        status: ACCEPTED_STATUS.into(),
    });
    owner.role = OWNER_ROLE.into();
    if owner.user.is_none() {
        owner.user = identity.owner.profile.clone();
    }
    let mut list = vec![owner];

    let me_id = identity.current_user.user_id.as_str();
    if me_id != owner_id {
        let mut me = find(me_id).unwrap_or_else(|| Collaborator {
            user_id: me_id.into(),
            user: None,
            role: DEFAULT_ROLE.into(),
            status: ACCEPTED_STATUS.into(),
        });
        if me.user.is_none() {
            me.user = identity.current_user.profile.clone();
        }
        list.push(me);
    }

    for collaborator in remote {
        if !list.iter().any(|c| c.user_id == collaborator.user_id) {
            list.push(collaborator);
        }
    }
    list
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEditor {
    pub user_id: String,
    pub user_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Ephemeral view of who is here and who is editing what.
#[derive(Debug, Clone)]
pub struct PresenceState {
    identity: LocalIdentity,
    collaborators: Vec<Collaborator>,
    connected: bool,
    active_editors: HashMap<String, ActiveEditor>,
}

impl PresenceState {
    pub fn new(identity: LocalIdentity) -> Self {
        let collaborators = normalize_collaborators(Vec::new(), &identity);
        Self {
            identity,
            collaborators,
            connected: false,
            active_editors: HashMap::new(),
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn collaborators(&self) -> &[Collaborator] {
        &self.collaborators
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn active_editors(&self) -> &HashMap<String, ActiveEditor> {
        &self.active_editors
    }

    pub fn editor_of(&self, item_id: &str) -> Option<&ActiveEditor> {
        self.active_editors.get(item_id)
    }

    /// Replace the list by the given one, keeping the mandatory entries.
    pub fn sync(&mut self, remote: Vec<Collaborator>) {
        self.collaborators = normalize_collaborators(remote, &self.identity);
    }

    /// Add or refresh a participant.
    pub fn join(&mut self, collaborator: Collaborator) {
        let mut remote: Vec<Collaborator> = self
            .collaborators
            .iter()
            .filter(|c| c.user_id != collaborator.user_id)
            .cloned()
            .collect();
        remote.push(collaborator);
        self.sync(remote);
    }

    /// Remove a participant. The owner and the current user always stay.
    pub fn leave(&mut self, user_id: &str) {
        let remote = self
            .collaborators
            .iter()
            .filter(|c| c.user_id != user_id)
            .cloned()
            .collect();
        self.sync(remote);
    }

    pub fn start_editing(&mut self, item_id: &str, editor: ActiveEditor) {
        self.active_editors.insert(item_id.into(), editor);
    }

    /// Only the user who started editing an item can release it.
    pub fn stop_editing(&mut self, item_id: &str, user_id: &str) -> bool {
        match self.active_editors.get(item_id) {
            Some(editor) if editor.user_id == user_id => {
                self.active_editors.remove(item_id);
                true
            }
            _ => false,
        }
    }

    pub fn collaborator(&self, user_id: &str) -> Option<&Collaborator> {
        self.collaborators.iter().find(|c| c.user_id == user_id)
    }
}
