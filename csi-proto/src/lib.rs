//! Generated CSI message and service types, compiled from `proto/csi.proto`
//! at build time by `tonic_build` (see `build.rs`), the same mechanism the
//! teacher uses for `rpc/build.rs` against `mayastor.proto`.

tonic::include_proto!("csi.v1");
