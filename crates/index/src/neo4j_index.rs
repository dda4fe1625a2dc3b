use anyhow::{Context, Result};
use extract::GraphResult;
use neo4rs::{Graph, Query};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::cypher::{cypher_label, plan, quote_name, WriteMode};

/// Executes generated statements against Neo4j.
pub struct Neo4jLoader {
    graph: Graph,
}

impl Neo4jLoader {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .with_context(|| format!("Failed to connect to Neo4j at {uri}"))?;
        info!(uri = %uri, "Connected to Neo4j");
        Ok(Self::new(graph))
    }

    /// Create an id index for every label in `labels`.
    pub async fn init_schema<I, S>(&self, labels: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for label in labels {
            let label = cypher_label(label.as_ref());
            let index_name = format!("{}_id_index", label.to_lowercase());
            let query = Query::new(format!(
                "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.id)",
                quote_name(&index_name),
                quote_name(&label)
            ));
            self.graph
                .run(query)
                .await
                .with_context(|| format!("Failed to create index on {label}.id"))?;
            debug!(label = %label, "Ensured id index");
        }
        Ok(())
    }

    /// Run statements in order. Stops at the first failure.
    pub async fn execute(&self, statements: &[String]) -> Result<usize> {
        for (i, statement) in statements.iter().enumerate() {
            self.graph
                .run(Query::new(statement.clone()))
                .await
                .with_context(|| format!("Failed to execute statement {} of {}", i + 1, statements.len()))?;
        }
        info!(statements = statements.len(), "Executed Cypher statements");
        Ok(statements.len())
    }

    /// Index the graph's labels, then write it with the given mode.
    pub async fn load(&self, graph: &GraphResult, mode: WriteMode) -> Result<usize> {
        let labels: BTreeSet<&str> = graph.nodes().iter().map(|n| n.label.as_str()).collect();
        self.init_schema(labels).await?;

        let statements: Vec<String> = plan(graph, mode).iter().map(|s| s.to_cypher()).collect();
        let executed = self.execute(&statements).await?;
        info!(
            strategy = %graph.provenance().strategy,
            nodes = graph.nodes().len(),
            relationships = graph.relationships().len(),
            mode = ?mode,
            "Loaded graph into Neo4j"
        );
        Ok(executed)
    }

    pub async fn ping(&self) -> Result<()> {
        self.graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .context("Neo4j did not answer")?;
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<GraphStats> {
        let node_count = self.count("MATCH (n) RETURN count(n) as count").await?;
        let relationship_count = self.count("MATCH ()-[r]->() RETURN count(r) as count").await?;

        Ok(GraphStats {
            node_count,
            relationship_count,
        })
    }

    async fn count(&self, cypher: &str) -> Result<usize> {
        let mut result = self
            .graph
            .execute(Query::new(cypher.to_string()))
            .await
            .context("Failed to query graph statistics")?;
        let count = if let Some(row) = result.next().await? {
            row.get::<i64>("count").unwrap_or(0) as usize
        } else {
            0
        };
        Ok(count)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub relationship_count: usize,
}
