pub mod cypher;
pub mod memory;
pub mod neo4j_index;

pub use cypher::{
    plan_create, plan_merge, to_batches, to_create_statements, to_merge_statements, Statement, WriteMode,
};
pub use memory::MemoryGraph;
pub use neo4j_index::{GraphStats, Neo4jLoader};

use extract::GraphResult;

/// Statements for `graph` in the requested mode, optionally grouped into batches.
pub fn statements(graph: &GraphResult, mode: WriteMode, batch_size: Option<usize>) -> Vec<String> {
    let statements = match mode {
        WriteMode::Create => to_create_statements(graph),
        WriteMode::Merge => to_merge_statements(graph),
    };
    match batch_size {
        Some(size) => to_batches(&statements, size),
        None => statements,
    }
}
