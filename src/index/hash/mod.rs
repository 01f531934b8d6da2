pub mod bucket_page;
pub mod directory_page;
pub mod error;
pub mod storable;
pub mod table;

pub use error::IndexError;
pub use storable::Storable;
pub use table::ExtendibleHashTable;
