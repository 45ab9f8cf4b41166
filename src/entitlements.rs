use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Guest,
    Regular,
}

/// Static per-user-type limits; a lookup table, not computed.
#[derive(Debug, Clone, Copy)]
pub struct Entitlements {
    pub max_messages_per_day: usize,
    pub available_chat_model_ids: &'static [&'static str],
}

const GUEST: Entitlements = Entitlements {
    max_messages_per_day: 20,
    available_chat_model_ids: &["chat-model", "chat-model-reasoning"],
};

const REGULAR: Entitlements = Entitlements {
    max_messages_per_day: 100,
    available_chat_model_ids: &["chat-model", "chat-model-reasoning"],
};

pub fn entitlements_for(user_type: UserType) -> Entitlements {
    match user_type {
        UserType::Guest => GUEST,
        UserType::Regular => REGULAR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guests_get_a_smaller_daily_quota() {
        let guest = entitlements_for(UserType::Guest);
        let regular = entitlements_for(UserType::Regular);
        assert!(guest.max_messages_per_day < regular.max_messages_per_day);
        assert!(guest.available_chat_model_ids.contains(&"chat-model"));
    }
}
