#![forbid(unsafe_code)]

pub mod drop_pipeline;
pub mod ipsec_service_impl;
