use std::io;

use crate::job::RamReport;

const MEMINFO: &str = "/proc/meminfo";

/// Reads the host memory report out of `/proc/meminfo`.
pub async fn read_meminfo() -> io::Result<RamReport> {
    let content = tokio::fs::read_to_string(MEMINFO).await?;
    parse_meminfo(&content).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "MemTotal or MemAvailable missing from /proc/meminfo",
        )
    })
}

/// Extracts `MemTotal` and `MemAvailable`, converted from kB to bytes.
pub fn parse_meminfo(content: &str) -> Option<RamReport> {
    let field = |name: &str| {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            let kb = rest.trim().trim_end_matches("kB").trim();
            kb.parse::<u64>().ok().map(|kb| kb * 1024)
        })
    };

    Some(RamReport {
        total_ram: field("MemTotal")?,
        available_ram: field("MemAvailable")?,
    })
}
