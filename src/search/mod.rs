pub mod gateway;
pub mod query_plan;
pub mod retriever;
pub mod vector;
