use serde::{Deserialize, Serialize};

/// The authenticated caller as resolved by the API auth layer. Standing on a
/// particular appointment (inviter or invitee) is derived from the aggregate,
/// not carried here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorIdentity {
    pub user_id: String,
    pub username: String,
}

impl ActorIdentity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }

    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            username: user_id.clone(),
            user_id,
        }
    }
}
