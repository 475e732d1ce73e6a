pub mod connection_table;
pub mod help_popup;
pub mod search_box;
pub mod summary_block;

pub use self::connection_table::ConnectionTableWidget;
pub use self::help_popup::HelpWidget;
pub use self::search_box::SearchWidget;
pub use self::summary_block::SummaryWidget;
