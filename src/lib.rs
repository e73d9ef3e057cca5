//! # hiercube
//!
//! `hiercube` is a multidimensional aggregation engine over hierarchical
//! dimensions, written in Rust. It supports:
//!
//! - Building dimension trees from relational records (parent, child or children links)
//! - Weighted parent/child edges, multiplied along the path to an ancestor
//! - Coordinates (skeletons) made of one node per dimension
//! - Lazy Cartesian enumeration of ancestor and leaf coordinates
//! - Parallel aggregation with Rayon
//! - Guarded runs that report errors and panics as a status instead of unwinding
//!
//! # Features
//!
//! - **Ancestor closure**: aggregate every coordinate derivable from the data
//! - **Targeted partition**: aggregate only the coordinates you ask for
//! - **Simplification**: collapse dimensions shared by every target (commutative reducers only)
//! - **Built-in reducers**: sum, count, average, min, max, or any closure
//! - **Consistency checks**: repeated labels and diamond-shaped hierarchies
//!
//! # Example
//!
//! ```rust
//! use hiercube::cube::{CubeAggregator, Dimension, ParentLink, SkeletonFactory, Sum};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let geo = Dimension::from_parent_links(
//!         "geo",
//!         vec![
//!             ParentLink::new("eu", None, "Europe"),
//!             ParentLink::new("fr", Some("eu"), "France"),
//!             ParentLink::new("de", Some("eu"), "Germany"),
//!         ],
//!     )?;
//!     let product = Dimension::from_parent_links(
//!         "product",
//!         vec![
//!             ParentLink::new("all", None, "All"),
//!             ParentLink::new("bread", Some("all"), "Bread"),
//!         ],
//!     )?;
//!     let dims = vec![geo, product];
//!
//!     // (country, product, amount)
//!     let sales = vec![("France", "Bread", 2.0), ("Germany", "Bread", 3.0)];
//!     let factory = SkeletonFactory::new(&dims)?;
//!     let observations = factory.observations(
//!         &sales,
//!         |s, dim| if dim == "geo" { s.0 } else { s.1 },
//!         |s| s.2,
//!     )?;
//!
//!     let result = CubeAggregator::new(Sum, Sum).aggregate(&observations);
//!     for cell in result.results() {
//!         println!("{} => {:?}", cell.skeleton, cell.value);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cube;
pub mod helpers;

pub use cube::{
    AggregationConfig, AggregationResult, Bone, CubeAggregator, CubeError, Dimension, Skeleton,
    SkeletonsAccumulator, Status, ValuedSkeleton,
};
