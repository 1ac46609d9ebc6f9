//! Generated wire types, compiled at build time from `proto/aggregator.proto`
//! by `tonic-build` (see `build.rs`).

tonic::include_proto!("aggregator");
