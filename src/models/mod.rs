//! 数据模型层

pub mod blob;
pub mod path_table;
pub mod vfs;

pub use blob::{BlobKind, StoreId, TreeBlob, LOCAL_ID_PREFIX};
pub use path_table::{PathError, PathTable, ROOT_PATH};
pub use vfs::{Find, Node, NodeData, NodeId, NodeKind, TreeRow, Vfs, VfsError};
