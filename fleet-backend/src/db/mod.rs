pub mod sqlite;
pub mod tables;

pub use sqlite::Database;
pub use tables::accounts::AccountUpdate;
pub use tables::settings::CardInfo;
