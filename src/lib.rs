pub mod clean;
pub mod collect;
pub mod config;
pub mod error;
pub mod fetch;
pub mod interpolate;
pub mod join;
pub mod merge;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod schedule;
pub mod stats;
pub mod timestamp;
pub mod window;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
