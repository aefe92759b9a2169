pub mod config;
pub mod connection;
pub mod data;
pub mod storage;

pub use config::{ConfigFieldError, ConfigMap, ConfigReader};
pub use connection::{
    CollectorState, ConnectionDef, ConnectionStatus, SourceType, StatusUpdate, UnknownSourceType,
};
pub use data::{
    DataRecord, DataStatus, Provenance, Quality, RawReading, ReadingFields, RegisterType,
    SerialData,
};
pub use storage::{ObjectStoreProvider, RelationalEngine, StorageDef, StorageKind, StorageStatus};
