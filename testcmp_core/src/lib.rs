pub mod report;
pub mod tool;
pub mod scanner;
pub mod comparison;
pub mod dispatch;
pub mod text_diff;
pub mod csv_diff;
pub mod dbf_diff;
pub mod geometry;
pub mod shp_diff;
pub mod netcdf;
pub mod image_diff;
pub mod json_diff;
pub mod gv_diff;
pub mod selective;

pub use comparison::{DirComparison, DirWalker};
pub use dispatch::{DetailedDiff, FileKind};
pub use text_diff::TextDiffEngine;
pub use csv_diff::CsvDiffEngine;
pub use dbf_diff::DbfDiffEngine;
pub use geometry::GeometryComparator;
pub use shp_diff::ShpDiffEngine;
pub use netcdf::NcDiffEngine;
pub use image_diff::{ImageDiffEngine, ImageDiffResult};
pub use json_diff::JsonDiffEngine;
pub use selective::{compare_file_pair, selective_diff};
pub use single_test::{cat_compar, compare_single_test};
