//! 预算层：类别权重与分配

pub mod allocator;

pub use allocator::{allocate, AllocationError, BudgetAllocation, Category, CategoryWeights};
