// src/config/raw.rs

//! Flat dotted-key text format for the `file:` backend, grounded on Qserv's
//! own `ConfigurationFile` parser: a line-oriented `section.key = value`
//! grammar with `#`-prefixed comments and blank lines ignored. Unlike the
//! crate's TOML test fixtures (used only by unit tests, via `MapBackend`),
//! this is the on-disk format a real deployment's `configUrl=file:...`
//! points at.

use super::{Catalog, ColumnDef, Database, DatabaseFamily, Scalars, Table, Worker};
use crate::core::errors::ControlPlaneError;
use std::collections::BTreeMap;

/// An intermediate, loosely-typed view of the flat key-value file, kept
/// around only long enough to validate and fold into a [`Catalog`]. Mirrors
/// the teacher's `RawConfig -> Config` staging: every field here is a plain
/// string, and only [`RawCatalog::into_catalog`] commits to types.
#[derive(Debug, Default, Clone)]
pub struct RawCatalog {
    pub entries: BTreeMap<String, String>,
}

impl RawCatalog {
    pub fn parse(text: &str) -> Result<Self, ControlPlaneError> {
        let mut entries = BTreeMap::new();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ControlPlaneError::InvalidArgument(format!(
                    "malformed configuration line {}: '{raw_line}'",
                    lineno + 1
                ))
            })?;
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self { entries })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn csv(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse_num<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ControlPlaneError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| ControlPlaneError::InvalidArgument(format!("bad value for '{key}': '{v}'"))),
        }
    }

    fn parse_bool(&self, key: &str, default: bool) -> Result<bool, ControlPlaneError> {
        match self.get(key) {
            None => Ok(default),
            Some("1") | Some("true") | Some("yes") => Ok(true),
            Some("0") | Some("false") | Some("no") => Ok(false),
            Some(v) => Err(ControlPlaneError::InvalidArgument(format!(
                "bad boolean for '{key}': '{v}'"
            ))),
        }
    }

    /// Folds the flat key space into a validated [`Catalog`]. Sections:
    /// `common.workers` (csv of names), `worker:<name>.*`,
    /// `common.database_families` (csv), `family:<name>.*`,
    /// `common.databases` (csv), `database:<name>.*`, and
    /// `table:<database>:<name>.*`.
    pub fn into_catalog(self) -> Result<Catalog, ControlPlaneError> {
        let mut catalog = Catalog::default();
        let scalars = Scalars {
            request_buf_size_bytes: self.parse_num("common.request_buf_size_bytes", 1024 * 1024)?,
            request_retry_interval_sec: self.parse_num("common.request_retry_interval_sec", 1)?,
            controller_num_threads: self.parse_num("controller.num_threads", 4)?,
            controller_http_server_port: self.parse_num("controller.http_server_port", 25080)?,
            controller_http_server_threads: self.parse_num("controller.http_server_threads", 4)?,
            controller_request_timeout_sec: self.parse_num("controller.request_timeout_sec", 300)?,
            controller_job_timeout_sec: self.parse_num("controller.job_timeout_sec", 6 * 3600)?,
            controller_job_heartbeat_sec: self.parse_num("controller.job_heartbeat_sec", 60)?,
            xrootd_auto_notify: self.parse_bool("xrootd.auto_notify", true)?,
            xrootd_host: self.get("xrootd.host").unwrap_or("localhost").to_string(),
            xrootd_port: self.parse_num("xrootd.port", 1094)?,
            xrootd_request_timeout_sec: self.parse_num("xrootd.request_timeout_sec", 300)?,
            worker_num_svc_processing_threads: self.parse_num("worker.num_svc_processing_threads", 4)?,
            worker_num_fs_processing_threads: self.parse_num("worker.num_fs_processing_threads", 4)?,
            worker_fs_buf_size_bytes: self.parse_num("worker.fs_buf_size_bytes", 1024 * 1024)?,
            worker_svc_port: self.parse_num("worker.svc_port", 25000)?,
            worker_fs_port: self.parse_num("worker.fs_port", 25001)?,
            worker_data_dir: self
                .get("worker.data_dir")
                .unwrap_or("/qserv/data/{worker}")
                .to_string(),
            empty_chunks_dir: self
                .get("common.empty_chunks_dir")
                .unwrap_or("/qserv/empty_chunks")
                .to_string(),
        };
        catalog.scalars = Some(scalars);
        catalog.scalars_set = true;

        for name in self.csv("common.workers") {
            let prefix = format!("worker:{name}");
            catalog.workers.insert(
                name.clone(),
                Worker {
                    name: name.clone(),
                    is_enabled: self.parse_bool(&format!("{prefix}.is_enabled"), true)?,
                    is_read_only: self.parse_bool(&format!("{prefix}.is_read_only"), false)?,
                    svc_host: self.get(&format!("{prefix}.svc_host")).unwrap_or(&name).to_string(),
                    svc_port: self.parse_num(&format!("{prefix}.svc_port"), 25000)?,
                    fs_host: self.get(&format!("{prefix}.fs_host")).unwrap_or(&name).to_string(),
                    fs_port: self.parse_num(&format!("{prefix}.fs_port"), 25001)?,
                    loader_host: self
                        .get(&format!("{prefix}.loader_host"))
                        .unwrap_or(&name)
                        .to_string(),
                    loader_port: self.parse_num(&format!("{prefix}.loader_port"), 25002)?,
                    db_host: self.get(&format!("{prefix}.db_host")).unwrap_or(&name).to_string(),
                    db_port: self.parse_num(&format!("{prefix}.db_port"), 3306)?,
                    db_user: self
                        .get(&format!("{prefix}.db_user"))
                        .unwrap_or("qsreplica")
                        .to_string(),
                    data_dir: self
                        .get(&format!("{prefix}.data_dir"))
                        .unwrap_or("/qserv/data/{worker}")
                        .to_string(),
                },
            );
        }

        for name in self.csv("common.database_families") {
            let prefix = format!("family:{name}");
            catalog.families.insert(
                name.clone(),
                DatabaseFamily {
                    name: name.clone(),
                    min_replication_level: self.parse_num(&format!("{prefix}.min_replication_level"), 1)?,
                    num_stripes: self.parse_num(&format!("{prefix}.num_stripes"), 340)?,
                    num_sub_stripes: self.parse_num(&format!("{prefix}.num_sub_stripes"), 12)?,
                    overlap: self.parse_num(&format!("{prefix}.overlap"), 0.01667)?,
                },
            );
        }

        for name in self.csv("common.databases") {
            let prefix = format!("database:{name}");
            let family = self.get(&format!("{prefix}.family")).unwrap_or_default().to_string();
            if !catalog.families.contains_key(&family) {
                return Err(ControlPlaneError::UnknownFamily(family));
            }
            catalog.databases.insert(
                name.clone(),
                Database {
                    name: name.clone(),
                    family,
                    is_published: self.parse_bool(&format!("{prefix}.is_published"), false)?,
                    partitioned_tables: self.csv(&format!("{prefix}.partitioned_tables")),
                    regular_tables: self.csv(&format!("{prefix}.regular_tables")),
                },
            );
        }

        for (db_name, database) in catalog.databases.clone() {
            for table_name in database
                .partitioned_tables
                .iter()
                .chain(database.regular_tables.iter())
            {
                let prefix = format!("table:{db_name}:{table_name}");
                let is_partitioned = database.partitioned_tables.contains(table_name);
                let schema = self
                    .csv(&format!("{prefix}.schema"))
                    .into_iter()
                    .map(|col| {
                        let (name, col_type) = col.split_once(':').unwrap_or((col.as_str(), "TEXT"));
                        ColumnDef {
                            name: name.to_string(),
                            col_type: col_type.to_string(),
                        }
                    })
                    .collect();
                catalog.tables.insert(
                    (db_name.clone(), table_name.clone()),
                    Table {
                        name: table_name.clone(),
                        database: db_name.clone(),
                        is_partitioned,
                        is_director: self.parse_bool(&format!("{prefix}.is_director"), false)?,
                        director_key: self.get(&format!("{prefix}.director_key")).map(str::to_string),
                        latitude_key: self.get(&format!("{prefix}.latitude_key")).map(str::to_string),
                        longitude_key: self.get(&format!("{prefix}.longitude_key")).map(str::to_string),
                        chunk_id_key: self.get(&format!("{prefix}.chunk_id_key")).map(str::to_string),
                        sub_chunk_id_key: self
                            .get(&format!("{prefix}.sub_chunk_id_key"))
                            .map(str::to_string),
                        schema,
                    },
                );
            }
        }

        Ok(catalog)
    }

    /// Serializes a [`Catalog`] back into the flat key format, the inverse
    /// of [`RawCatalog::into_catalog`]. Used by `FileBackend::save`.
    pub fn render(catalog: &Catalog) -> String {
        let mut out = String::new();
        let scalars = catalog.scalars.clone().unwrap_or_default();
        out.push_str("# Generated by the replication control plane. Do not hand-edit\n");
        out.push_str("# while the controller process is running.\n");
        out.push_str(&format!(
            "common.request_buf_size_bytes = {}\n",
            scalars.request_buf_size_bytes
        ));
        out.push_str(&format!(
            "common.request_retry_interval_sec = {}\n",
            scalars.request_retry_interval_sec
        ));
        out.push_str(&format!("controller.num_threads = {}\n", scalars.controller_num_threads));
        out.push_str(&format!(
            "controller.http_server_port = {}\n",
            scalars.controller_http_server_port
        ));
        out.push_str(&format!(
            "controller.http_server_threads = {}\n",
            scalars.controller_http_server_threads
        ));
        out.push_str(&format!(
            "controller.request_timeout_sec = {}\n",
            scalars.controller_request_timeout_sec
        ));
        out.push_str(&format!(
            "controller.job_timeout_sec = {}\n",
            scalars.controller_job_timeout_sec
        ));
        out.push_str(&format!(
            "controller.job_heartbeat_sec = {}\n",
            scalars.controller_job_heartbeat_sec
        ));
        out.push_str(&format!("xrootd.auto_notify = {}\n", scalars.xrootd_auto_notify));
        out.push_str(&format!("xrootd.host = {}\n", scalars.xrootd_host));
        out.push_str(&format!("xrootd.port = {}\n", scalars.xrootd_port));
        out.push_str(&format!(
            "xrootd.request_timeout_sec = {}\n",
            scalars.xrootd_request_timeout_sec
        ));
        out.push_str(&format!(
            "worker.num_svc_processing_threads = {}\n",
            scalars.worker_num_svc_processing_threads
        ));
        out.push_str(&format!(
            "worker.num_fs_processing_threads = {}\n",
            scalars.worker_num_fs_processing_threads
        ));
        out.push_str(&format!(
            "worker.fs_buf_size_bytes = {}\n",
            scalars.worker_fs_buf_size_bytes
        ));
        out.push_str(&format!("worker.svc_port = {}\n", scalars.worker_svc_port));
        out.push_str(&format!("worker.fs_port = {}\n", scalars.worker_fs_port));
        out.push_str(&format!("worker.data_dir = {}\n", scalars.worker_data_dir));
        out.push_str(&format!("common.empty_chunks_dir = {}\n", scalars.empty_chunks_dir));

        let worker_names: Vec<&str> = catalog.workers.keys().map(String::as_str).collect();
        out.push_str(&format!("common.workers = {}\n", worker_names.join(",")));
        for worker in catalog.workers.values() {
            let prefix = format!("worker:{}", worker.name);
            out.push_str(&format!("{prefix}.is_enabled = {}\n", worker.is_enabled));
            out.push_str(&format!("{prefix}.is_read_only = {}\n", worker.is_read_only));
            out.push_str(&format!("{prefix}.svc_host = {}\n", worker.svc_host));
            out.push_str(&format!("{prefix}.svc_port = {}\n", worker.svc_port));
            out.push_str(&format!("{prefix}.fs_host = {}\n", worker.fs_host));
            out.push_str(&format!("{prefix}.fs_port = {}\n", worker.fs_port));
            out.push_str(&format!("{prefix}.loader_host = {}\n", worker.loader_host));
            out.push_str(&format!("{prefix}.loader_port = {}\n", worker.loader_port));
            out.push_str(&format!("{prefix}.db_host = {}\n", worker.db_host));
            out.push_str(&format!("{prefix}.db_port = {}\n", worker.db_port));
            out.push_str(&format!("{prefix}.db_user = {}\n", worker.db_user));
            out.push_str(&format!("{prefix}.data_dir = {}\n", worker.data_dir));
        }

        let family_names: Vec<&str> = catalog.families.keys().map(String::as_str).collect();
        out.push_str(&format!("common.database_families = {}\n", family_names.join(",")));
        for family in catalog.families.values() {
            let prefix = format!("family:{}", family.name);
            out.push_str(&format!(
                "{prefix}.min_replication_level = {}\n",
                family.min_replication_level
            ));
            out.push_str(&format!("{prefix}.num_stripes = {}\n", family.num_stripes));
            out.push_str(&format!("{prefix}.num_sub_stripes = {}\n", family.num_sub_stripes));
            out.push_str(&format!("{prefix}.overlap = {}\n", family.overlap));
        }

        let db_names: Vec<&str> = catalog.databases.keys().map(String::as_str).collect();
        out.push_str(&format!("common.databases = {}\n", db_names.join(",")));
        for database in catalog.databases.values() {
            let prefix = format!("database:{}", database.name);
            out.push_str(&format!("{prefix}.family = {}\n", database.family));
            out.push_str(&format!("{prefix}.is_published = {}\n", database.is_published));
            out.push_str(&format!(
                "{prefix}.partitioned_tables = {}\n",
                database.partitioned_tables.join(",")
            ));
            out.push_str(&format!(
                "{prefix}.regular_tables = {}\n",
                database.regular_tables.join(",")
            ));
        }

        for table in catalog.tables.values() {
            let prefix = format!("table:{}:{}", table.database, table.name);
            out.push_str(&format!("{prefix}.is_director = {}\n", table.is_director));
            if let Some(v) = &table.director_key {
                out.push_str(&format!("{prefix}.director_key = {v}\n"));
            }
            if let Some(v) = &table.latitude_key {
                out.push_str(&format!("{prefix}.latitude_key = {v}\n"));
            }
            if let Some(v) = &table.longitude_key {
                out.push_str(&format!("{prefix}.longitude_key = {v}\n"));
            }
            if let Some(v) = &table.chunk_id_key {
                out.push_str(&format!("{prefix}.chunk_id_key = {v}\n"));
            }
            if let Some(v) = &table.sub_chunk_id_key {
                out.push_str(&format!("{prefix}.sub_chunk_id_key = {v}\n"));
            }
            let schema_csv = table
                .schema
                .iter()
                .map(|c| format!("{}:{}", c.name, c.col_type))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&format!("{prefix}.schema = {schema_csv}\n"));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_minimal_catalog() {
        let mut catalog = Catalog::default();
        catalog.scalars = Some(Scalars::default());
        catalog.families.insert(
            "layout_340_12".to_string(),
            DatabaseFamily {
                name: "layout_340_12".to_string(),
                min_replication_level: 2,
                num_stripes: 340,
                num_sub_stripes: 12,
                overlap: 0.01667,
            },
        );
        let rendered = RawCatalog::render(&catalog);
        let parsed = RawCatalog::parse(&rendered).unwrap().into_catalog().unwrap();
        assert_eq!(parsed.families, catalog.families);
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(RawCatalog::parse("not-a-key-value-line").is_err());
    }
}
