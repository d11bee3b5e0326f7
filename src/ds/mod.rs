pub mod arena;
pub mod recency_list;

pub use arena::{Arena, EntryId};
pub use recency_list::{RecencyIter, RecencyList};
