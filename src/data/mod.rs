//! Definition data: TOML packs, the record mini-language, the core pack

pub mod grammar;
pub mod pack;
pub mod record;

pub use grammar::{parse_calls, parse_functors, Call, Functor};
pub use pack::{core_pack, DataPack, RecordKind, SkippedRecord};
pub use record::DefinitionRecord;
