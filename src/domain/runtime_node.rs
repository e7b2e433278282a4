use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Online,
    Offline,
    Draining,
    Maintenance,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "ONLINE",
            NodeStatus::Offline => "OFFLINE",
            NodeStatus::Draining => "DRAINING",
            NodeStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONLINE" => Ok(NodeStatus::Online),
            "OFFLINE" => Ok(NodeStatus::Offline),
            "DRAINING" => Ok(NodeStatus::Draining),
            "MAINTENANCE" => Ok(NodeStatus::Maintenance),
            other => Err(anyhow::anyhow!("unknown node status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Local,
    Cluster,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Local => "local",
            NodeType::Cluster => "cluster",
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(NodeType::Local),
            "cluster" => Ok(NodeType::Cluster),
            other => Err(anyhow::anyhow!("unknown node type: {other}")),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RuntimeNode {
    pub id: String,
    pub hostname: String,
    pub node_type: String,
    pub endpoint: String,
    pub status: String,
    pub total_cpu: f64,
    pub total_memory_mb: i64,
    pub allocated_cpu: f64,
    pub allocated_memory_mb: i64,
    pub container_count: i32,
    pub max_containers: i32,
    pub cached_images: serde_json::Value,
    pub last_heartbeat_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RuntimeNode {
    pub fn status(&self) -> NodeStatus {
        self.status
            .parse()
            .unwrap_or_else(|_| panic!("invalid status in row: {}", self.status))
    }

    pub fn has_capacity(&self, cpu: f64, memory_mb: i64) -> bool {
        self.status() == NodeStatus::Online
            && self.allocated_cpu + cpu <= self.total_cpu
            && self.allocated_memory_mb + memory_mb <= self.total_memory_mb
            && self.container_count < self.max_containers
    }

    pub fn caches_image(&self, image: &str) -> bool {
        self.cached_images
            .as_array()
            .map(|a| a.iter().any(|v| v.as_str() == Some(image)))
            .unwrap_or(false)
    }

    /// Lower is better: combined fractional utilization of cpu and memory.
    pub fn utilization(&self) -> f64 {
        let cpu_frac = if self.total_cpu > 0.0 {
            self.allocated_cpu / self.total_cpu
        } else {
            1.0
        };
        let mem_frac = if self.total_memory_mb > 0 {
            self.allocated_memory_mb as f64 / self.total_memory_mb as f64
        } else {
            1.0
        };
        cpu_frac + mem_frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(status: NodeStatus, allocated_cpu: f64, allocated_memory_mb: i64, container_count: i32) -> RuntimeNode {
        let now = Utc::now();
        RuntimeNode {
            id: "node-1".to_string(),
            hostname: "host-1".to_string(),
            node_type: "local".to_string(),
            endpoint: "http://localhost:8080".to_string(),
            status: status.as_str().to_string(),
            total_cpu: 4.0,
            total_memory_mb: 8192,
            allocated_cpu,
            allocated_memory_mb,
            container_count,
            max_containers: 10,
            cached_images: serde_json::json!(["python:3.11"]),
            last_heartbeat_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn has_capacity_respects_cpu_memory_and_container_limits() {
        let n = node(NodeStatus::Online, 3.5, 7000, 5);
        assert!(n.has_capacity(0.5, 1000));
        assert!(!n.has_capacity(1.0, 100));
        assert!(!n.has_capacity(0.1, 1500));
    }

    #[test]
    fn offline_node_never_has_capacity() {
        let n = node(NodeStatus::Offline, 0.0, 0, 0);
        assert!(!n.has_capacity(0.1, 10));
    }

    #[test]
    fn caches_image_checks_the_cached_images_array() {
        let n = node(NodeStatus::Online, 0.0, 0, 0);
        assert!(n.caches_image("python:3.11"));
        assert!(!n.caches_image("node:20"));
    }

    #[test]
    fn utilization_is_the_sum_of_cpu_and_memory_fractions() {
        let n = node(NodeStatus::Online, 2.0, 4096, 0);
        assert_eq!(n.utilization(), 0.5 + 0.5);
    }
}
