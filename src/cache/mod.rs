//! KV cache compression.
//!
//! This module contains the cache data structures and the compression pipeline:
//! - [`kv`]: KvHead, KvCache, CompressedHead, CompressedCache
//! - [`compressor`]: attention-guided token selection and zero-fill decompression
//! - [`adapter`]: per-model-family thresholds and attention windows
//! - [`quality`]: bandwidth metrics and quality validation

pub mod adapter;
pub mod compressor;
pub mod kv;
pub mod quality;
