use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_index();
        self.apply_env_overrides_gateway();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("MEDBOT_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid MEDBOT_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("MEDBOT_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("MEDBOT_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("MEDBOT_LLM_MAX_TOKENS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.llm.max_tokens = n;
        }
        if let Ok(v) = std::env::var("MEDBOT_LLM_TEMPERATURE")
            && let Ok(t) = v.parse::<f32>()
        {
            self.llm.temperature = Some(t);
        }
        if let Ok(v) = std::env::var("MEDBOT_LLM_RATE_LIMIT_RETRIES")
            && let Ok(n) = v.parse::<u32>()
        {
            self.llm.rate_limit_retries = n;
        }
        if let Ok(v) = std::env::var("MEDBOT_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid MEDBOT_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("MEDBOT_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("MEDBOT_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("MEDBOT_TIMEOUT_LLM")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.timeouts.llm_seconds = secs;
        }
        if let Ok(v) = std::env::var("MEDBOT_TIMEOUT_EMBEDDING")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.timeouts.embedding_seconds = secs;
        }
        if let Ok(v) = std::env::var("MEDBOT_GENERATION_MAX_RETRIES")
            && let Ok(n) = v.parse::<u32>()
        {
            self.generation.max_retries = n;
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("MEDBOT_INDEX_PATH") {
            self.index.path = v;
        }
        if let Ok(v) = std::env::var("MEDBOT_DOCS_DIR") {
            self.index.docs_dir = v;
        }
        if let Ok(v) = std::env::var("MEDBOT_TOP_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.index.top_k = k;
        }
    }

    fn apply_env_overrides_gateway(&mut self) {
        if let Ok(v) = std::env::var("MEDBOT_GATEWAY_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.gateway.enabled = enabled;
        }
        if let Ok(v) = std::env::var("MEDBOT_GATEWAY_BIND") {
            self.gateway.bind = v;
        }
        if let Ok(v) = std::env::var("MEDBOT_GATEWAY_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.gateway.port = port;
        }
        if let Ok(v) = std::env::var("MEDBOT_GATEWAY_RATE_LIMIT")
            && let Ok(limit) = v.parse::<u32>()
        {
            self.gateway.rate_limit = limit;
        }
    }
}
