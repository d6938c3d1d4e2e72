// SQLite keeps timestamps as fixed-width RFC 3339 text so they sort as strings.

diesel::table! {
    companies (id) {
        id -> BigInt,
        name -> Text,
        email -> Text,
        password_hash -> Text,
        status -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    facebook_settings (id) {
        id -> BigInt,
        company_id -> BigInt,
        page_id -> Text,
        page_name -> Nullable<Text>,
        access_token -> Text,
        webhook_verified -> Bool,
        webhook_subscribed -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    conversations (id) {
        id -> BigInt,
        company_id -> BigInt,
        facebook_page_id -> Text,
        user_id -> Text,
        customer_name -> Nullable<Text>,
        unread_messages -> BigInt,
        message_count -> BigInt,
        last_message_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    messages (id) {
        id -> BigInt,
        conversation_id -> BigInt,
        company_id -> BigInt,
        direction -> Text,
        sender_type -> Text,
        content -> Text,
        external_id -> Nullable<Text>,
        delivery_attempts -> Integer,
        next_attempt_at -> Nullable<Text>,
        last_error -> Nullable<Text>,
        dead_lettered -> Bool,
        created_at -> Text,
        delivered_at -> Nullable<Text>,
    }
}

diesel::table! {
    categories (id) {
        id -> BigInt,
        company_id -> BigInt,
        name -> Text,
        description -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    products (id) {
        id -> BigInt,
        company_id -> BigInt,
        category_id -> Nullable<BigInt>,
        name -> Text,
        description -> Nullable<Text>,
        price_cents -> BigInt,
        stock -> Integer,
        sku -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    coupons (id) {
        id -> BigInt,
        company_id -> BigInt,
        code -> Text,
        discount_type -> Text,
        discount_value -> BigInt,
        min_order_cents -> Nullable<BigInt>,
        usage_limit -> Nullable<Integer>,
        used_count -> Integer,
        starts_at -> Nullable<Text>,
        expires_at -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(facebook_settings -> companies (company_id));
diesel::joinable!(conversations -> companies (company_id));
diesel::joinable!(messages -> conversations (conversation_id));
diesel::joinable!(categories -> companies (company_id));
diesel::joinable!(products -> companies (company_id));
diesel::joinable!(coupons -> companies (company_id));

diesel::allow_tables_to_appear_in_same_query!(
    companies,
    facebook_settings,
    conversations,
    messages,
    categories,
    products,
    coupons,
);
