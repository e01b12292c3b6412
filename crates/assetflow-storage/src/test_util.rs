//! Shared fixtures for storage tests

use crate::serializer::{FileStamp, StorageManaged};
use crate::size::EstimateSize;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
    pub value: u32,
    #[serde(default = "valid_by_default")]
    pub valid: bool,
    #[serde(skip)]
    pub stamp: FileStamp,
}

const fn valid_by_default() -> bool {
    true
}

impl TestRecord {
    pub fn new(name: &str, value: u32) -> Self {
        Self {
            name: name.to_string(),
            value,
            valid: true,
            stamp: FileStamp::default(),
        }
    }
}

impl EstimateSize for TestRecord {
    fn heap_size(&self) -> usize {
        self.name.heap_size()
    }
}

impl StorageManaged for TestRecord {
    fn file_stamp(&self) -> FileStamp {
        self.stamp
    }

    fn set_file_stamp(&mut self, stamp: FileStamp) {
        self.stamp = stamp;
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}
