//! facedex-store — storage adapters for the facedex collaborator traits:
//! SQLite personnel records and a filesystem photo store.

pub mod images;
pub mod personnel;

pub use images::FsImageStore;
pub use personnel::SqlitePersonnel;
