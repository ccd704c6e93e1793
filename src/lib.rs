pub mod align;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod families;
pub mod outbreak;
pub mod owid;
pub mod oxford;
pub mod partition;
pub mod reference;
pub mod s3;
pub mod series;
pub mod smooth;
pub mod storage;
pub mod writer;
