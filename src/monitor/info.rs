// src/monitor/info.rs

//! Parses the textual `INFO replication` section of a monitored instance.

/// The role an instance reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Master,
    Slave,
    Unknown,
}

/// One `slaveN:` line from a primary's replication info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveLine {
    pub ip: String,
    pub port: u16,
    pub state: String,
    pub offset: u64,
}

/// The parsed replication section. Fields absent from the text stay `None`.
#[derive(Debug, Clone, Default)]
pub struct ReplicationInfo {
    pub role: Option<InstanceRole>,
    pub run_id: Option<String>,
    pub master_host: Option<String>,
    pub master_port: Option<u16>,
    pub master_link_status: Option<String>,
    pub slave_repl_offset: Option<u64>,
    pub slave_priority: Option<u32>,
    pub slaves: Vec<SlaveLine>,
}

pub fn parse_replication_info(text: &str) -> ReplicationInfo {
    let mut info = ReplicationInfo::default();
    for line in text.lines() {
        let line = line.trim();
        if let Some(val) = line.strip_prefix("role:") {
            info.role = Some(match val.trim() {
                "master" => InstanceRole::Master,
                "slave" => InstanceRole::Slave,
                _ => InstanceRole::Unknown,
            });
        } else if let Some(val) = line.strip_prefix("run_id:") {
            info.run_id = Some(val.trim().to_string());
        } else if let Some(val) = line.strip_prefix("master_replid:") {
            // Older servers expose the instance identity only here.
            if info.run_id.is_none() {
                info.run_id = Some(val.trim().to_string());
            }
        } else if let Some(val) = line.strip_prefix("master_host:") {
            info.master_host = Some(val.trim().to_string());
        } else if let Some(val) = line.strip_prefix("master_port:") {
            info.master_port = val.trim().parse().ok();
        } else if let Some(val) = line.strip_prefix("master_link_status:") {
            info.master_link_status = Some(val.trim().to_string());
        } else if let Some(val) = line.strip_prefix("slave_repl_offset:") {
            info.slave_repl_offset = val.trim().parse().ok();
        } else if let Some(val) = line.strip_prefix("slave_priority:") {
            info.slave_priority = val.trim().parse().ok();
        } else if line.starts_with("slave") {
            if let Some((_, val)) = line.split_once(':') {
                if let Some(slave) = parse_slave_line(val) {
                    info.slaves.push(slave);
                }
            }
        }
    }
    info
}

/// Parses the `ip=..,port=..,state=..,offset=..` payload of a `slaveN:` line.
fn parse_slave_line(val: &str) -> Option<SlaveLine> {
    let mut ip = None;
    let mut port = None;
    let mut state = String::new();
    let mut offset = 0;
    for part in val.split(',') {
        let (key, value) = part.split_once('=')?;
        match key {
            "ip" => ip = Some(value.to_string()),
            "port" => port = value.parse().ok(),
            "state" => state = value.to_string(),
            "offset" => offset = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    Some(SlaveLine {
        ip: ip?,
        port: port?,
        state,
        offset,
    })
}
