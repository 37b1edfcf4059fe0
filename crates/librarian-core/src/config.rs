use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub source_paths: Vec<String>,
    pub library_root: String,
    /// Read-only product catalog. Classification degrades gracefully without it.
    pub knowledge_db: Option<String>,
    pub ignore_patterns: Vec<String>,
    /// Files smaller than this are never staged.
    pub min_file_size_bytes: u64,
    /// Size above which a candidate earns the size bonus in the quality score.
    pub quality_size_bytes: u64,
    pub batch_size: usize,
    pub staging_dir: String,
    pub keep_staging: bool,
    pub skip_hidden: bool,
    pub resources: ResourceConfig,
    pub documents: DocumentConfig,
    pub classifier: ClassifierConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_paths: Vec::new(),
            library_root: String::new(),
            knowledge_db: None,
            ignore_patterns: Vec::new(),
            min_file_size_bytes: 10,
            quality_size_bytes: 10 * 1024,
            batch_size: 100,
            staging_dir: ".librarian".to_string(),
            keep_staging: false,
            skip_hidden: true,
            resources: ResourceConfig::default(),
            documents: DocumentConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub max_workers: usize,
    pub memory_per_worker_mb: u64,
    pub os_reserved_mb: u64,
    pub max_ram_ratio: f64,
    pub min_free_mb: u64,
    pub pressure_wait_secs: u64,
    pub pressure_used_percent: f64,
    pub pressure_swap_percent: f64,
    pub cache_secs: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            memory_per_worker_mb: 600,
            os_reserved_mb: 2048,
            max_ram_ratio: 0.5,
            min_free_mb: 400,
            pressure_wait_secs: 300,
            pressure_used_percent: 90.0,
            pressure_swap_percent: 50.0,
            cache_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Upper bound on concurrent validations; native parsers spike on bad input.
    pub validation_workers: usize,
    pub timeout_secs: u64,
    pub repair_timeout_secs: u64,
    pub max_text_pages: usize,
    /// Run probes, text extraction and in-process repairs in a killable
    /// child process.
    pub isolate: bool,
    /// Executable answering the hidden `worker` subcommands. The CLI fills
    /// this with its own path; when unset, isolation falls back to in-process.
    pub worker_program: Option<String>,
    pub repair_strategies: Vec<String>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            validation_workers: 1,
            timeout_secs: 30,
            repair_timeout_secs: 60,
            max_text_pages: 10,
            isolate: true,
            worker_program: None,
            repair_strategies: vec![
                "qpdf-rewrite".to_string(),
                "lopdf-resave".to_string(),
                "qpdf-linearize".to_string(),
                "ghostscript-reencode".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub fuzzy_threshold: f64,
    pub isbn_lookup: bool,
    pub isbn_endpoint: String,
    pub isbn_timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.90,
            isbn_lookup: false,
            isbn_endpoint: "https://openlibrary.org/api/books".to_string(),
            isbn_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    pub fn staging_path(&self) -> PathBuf {
        PathBuf::from(&self.staging_dir)
    }

    pub fn library_path(&self) -> PathBuf {
        PathBuf::from(&self.library_root)
    }
}

/// Load `Librarian.toml` (optional) overlaid with `LIBRARIAN_*` env vars.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Librarian").required(false))
        .add_source(
            Environment::with_prefix("LIBRARIAN")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("source_paths")
                .with_list_parse_key("ignore_patterns")
                .try_parsing(true),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|kept| dir_path.starts_with(Path::new(kept))) {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(dir_path));
        result.push(dir);
    }

    result
}
