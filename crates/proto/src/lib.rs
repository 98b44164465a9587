//! Generated protobuf types for the interceptor wire protocol.
//!
//! The schema lives in `proto/interceptor.proto` and is compiled by
//! `prost-build` in `build.rs`. Field numbers and enum values are part of the
//! wire contract (see spec §4.1/§6) and must never be reused once shipped.

include!(concat!(env!("OUT_DIR"), "/interceptor.rs"));
