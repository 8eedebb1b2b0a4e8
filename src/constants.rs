/// Column name constants shared across stages
/// These define the canonical orders/users schema and the derived column names

// Raw orders columns
pub const ORDER_ID: &str = "order_id";
pub const USER_ID: &str = "user_id";
pub const AMOUNT: &str = "amount";
pub const QUANTITY: &str = "quantity";
pub const CREATED_AT: &str = "created_at";
pub const STATUS: &str = "status";

// Users columns
pub const COUNTRY: &str = "country";
pub const SIGNUP_DATE: &str = "signup_date";

// Derived columns
pub const STATUS_CLEAN: &str = "status_clean";
pub const MISSING_FLAG_SUFFIX: &str = "__isna";
pub const OUTLIER_FLAG_SUFFIX: &str = "__is_outlier";
pub const WINSOR_SUFFIX: &str = "_winsor";

// Time parts
pub const DATE: &str = "date";
pub const YEAR: &str = "year";
pub const MONTH: &str = "month";
pub const DAY_OF_WEEK: &str = "dow";
pub const HOUR: &str = "hour";

// Summary report columns
pub const SUMMARY_COUNT: &str = "n";
pub const SUMMARY_SUM: &str = "revenue";

/// Required columns of the raw orders table
pub const ORDERS_RAW_COLUMNS: [&str; 6] = [ORDER_ID, USER_ID, AMOUNT, QUANTITY, CREATED_AT, STATUS];

/// Required columns of the users table
pub const USERS_COLUMNS: [&str; 3] = [USER_ID, COUNTRY, SIGNUP_DATE];

/// Name of the boolean missing-value flag for `column`
pub fn missing_flag_column(column: &str) -> String {
    format!("{column}{MISSING_FLAG_SUFFIX}")
}

/// Name of the boolean outlier flag for `column`
pub fn outlier_flag_column(column: &str) -> String {
    format!("{column}{OUTLIER_FLAG_SUFFIX}")
}

/// Name of the winsorized copy of `column`
pub fn winsor_column(column: &str) -> String {
    format!("{column}{WINSOR_SUFFIX}")
}
