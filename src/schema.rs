diesel::table! {
    posts (post_id) {
        post_id -> Text,
        post_url -> Text,
        post_title -> Text,
        post_body -> Text,
        created_at -> TimestamptzSqlite,
        processed_at -> TimestamptzSqlite,
    }
}

diesel::table! {
    advice (post_id) {
        post_id -> Text,
        prompt -> Text,
        response -> Text,
        created_at -> TimestamptzSqlite,
    }
}

diesel::table! {
    comments (comment_id) {
        comment_id -> Text,
        post_id -> Text,
        comment_body -> Text,
        comment_score -> Integer,
        comment_rank -> Integer,
        is_advice -> Nullable<Bool>,
        similarity_score -> Nullable<Float>,
        fetched_at -> TimestamptzSqlite,
    }
}

diesel::joinable!(advice -> posts (post_id));
diesel::joinable!(comments -> posts (post_id));

diesel::allow_tables_to_appear_in_same_query!(posts, advice, comments,);
