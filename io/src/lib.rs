//! Point cloud file I/O
//!
//! - PCD (Point Cloud Data - PCL format), ASCII data section

pub mod pcd;

pub use pcd::{read_pcd, read_pcd_file, write_pcd, write_pcd_file, PcdData};

pub use sv_core::{Error, Result};
