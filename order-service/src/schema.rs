diesel::table! {
    orders (id) {
        id -> Uuid,
        variant_id -> Varchar,
        quantity -> Int8,
        total -> Numeric,
        user_id -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    stock (variant_id) {
        variant_id -> Varchar,
        quantity -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    stock,
);
