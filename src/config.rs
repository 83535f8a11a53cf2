use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};

/// Default embedding model. Multilingual so that non-English
/// questions (and the Khmer affirmative tokens) embed sensibly.
const DEFAULT_EMBEDDING_MODEL: &str = "multilingual-e5-small";
/// Default similarity threshold for a confident knowledge-base match
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Default generative model used for fallback answers
const DEFAULT_GENERATIVE_MODEL: &str = "gemini-1.5-flash";
/// Default timeout for a generative request in seconds
const DEFAULT_GENERATIVE_TIMEOUT_SECS: u64 = 60;

const DEFAULT_KNOWLEDGE_FILE: &str = "knowledge.csv";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Configuration for the embedding-based matcher
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Model name for embeddings (e.g., "multilingual-e5-small")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Minimum cosine similarity for a confident match [0.0, 1.0]
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f32,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// Configuration for the generative fallback provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerativeConfig {
    /// Model name passed to the provider API
    #[serde(default = "default_generative_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_generative_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GENERATIVE_MODEL.to_string(),
            timeout_secs: DEFAULT_GENERATIVE_TIMEOUT_SECS,
        }
    }
}

/// Configuration for feedback handling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Messages accepted as "yes" when confirming a fallback answer.
    /// Compared case-insensitively.
    #[serde(default = "default_affirmative")]
    pub affirmative: Vec<String>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            affirmative: default_affirmative(),
        }
    }
}

fn default_affirmative() -> Vec<String> {
    ["yes", "y", "បាទ", "ចាស"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_generative_model() -> String {
    DEFAULT_GENERATIVE_MODEL.to_string()
}

fn default_generative_timeout_secs() -> u64 {
    DEFAULT_GENERATIVE_TIMEOUT_SECS
}

fn default_knowledge_file() -> String {
    DEFAULT_KNOWLEDGE_FILE.to_string()
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Knowledge base CSV file, relative to the data directory
    #[serde(default = "default_knowledge_file")]
    pub knowledge_file: String,

    /// Address the daemon listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub semantic: SemanticConfig,

    #[serde(default)]
    pub generative: GenerativeConfig,

    #[serde(default)]
    pub feedback: FeedbackConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            knowledge_file: default_knowledge_file(),
            listen_addr: default_listen_addr(),
            semantic: SemanticConfig::default(),
            generative: GenerativeConfig::default(),
            feedback: FeedbackConfig::default(),
            base_path: String::new(),
        }
    }
}

impl Config {
    fn validate(&self) {
        if self.knowledge_file.is_empty() {
            panic!("knowledge_file must not be empty");
        }

        if !(0.0..=1.0).contains(&self.semantic.threshold) {
            panic!(
                "semantic.threshold must be between 0.0 and 1.0, got {}",
                self.semantic.threshold
            );
        }

        if self.semantic.download_timeout_secs == 0 {
            panic!("semantic.download_timeout_secs must be greater than 0");
        }

        if self.generative.timeout_secs == 0 {
            panic!("generative.timeout_secs must be greater than 0");
        }

        if self.feedback.affirmative.is_empty() {
            panic!("feedback.affirmative must contain at least one token");
        }
    }

    pub fn load_with(base_path: &str) -> Self {
        let store = storage::BackendLocal::new(base_path).expect("cannot create data directory");

        // create new if does not exist
        if !store.exists("config.yaml") {
            store
                .write(
                    "config.yaml",
                    serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
                )
                .expect("cannot write default config");
        }

        let config_str = String::from_utf8(store.read("config.yaml").expect("cannot read config"))
            .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let store =
            storage::BackendLocal::new(&self.base_path).expect("cannot create data directory");

        let config_str = serde_yml::to_string(&self).unwrap();
        store
            .write("config.yaml", config_str.as_bytes())
            .expect("cannot write config");
    }
}
