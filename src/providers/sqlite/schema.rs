diesel::table! {
    users (id) {
        id -> Text,
        email -> Text,
        password -> Nullable<Text>,
    }
}

diesel::table! {
    chats (id) {
        id -> Text,
        user_id -> Text,
        title -> Text,
        visibility -> Text,
        created_at -> BigInt,
        last_context -> Nullable<Text>,
    }
}

diesel::table! {
    messages (id) {
        id -> Text,
        chat_id -> Text,
        role -> Text,
        parts -> Text,
        attachments -> Text,
        created_at -> BigInt,
    }
}

diesel::table! {
    votes (chat_id, message_id) {
        chat_id -> Text,
        message_id -> Text,
        is_upvoted -> Bool,
    }
}

diesel::table! {
    documents (id, created_at) {
        id -> Text,
        user_id -> Text,
        title -> Text,
        kind -> Text,
        content -> Text,
        created_at -> BigInt,
    }
}

diesel::table! {
    suggestions (id) {
        id -> Text,
        document_id -> Text,
        document_created_at -> BigInt,
        original_text -> Text,
        suggested_text -> Text,
        description -> Nullable<Text>,
        is_resolved -> Bool,
        user_id -> Text,
        created_at -> BigInt,
    }
}

diesel::table! {
    streams (id) {
        id -> Text,
        chat_id -> Text,
        created_at -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    users,
    chats,
    messages,
    votes,
    documents,
    suggestions,
    streams,
);
