//! End-to-end sweep scenarios against a stub provider adapter.
//!
//! The sandbox still executes real Python, so tests that evaluate code are
//! skipped when `python3` is not on PATH.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use modelmeter_backend::bench::Engine;
use modelmeter_backend::catalogue;
use modelmeter_backend::config::{Config, ScoreCalibration};
use modelmeter_backend::drift::{self, signature::AlertStatus, DriftCache};
use modelmeter_backend::models::{
    AxisVector, ChangeType, NewScore, Suite, Vendor, AXIS_PLACEHOLDER, SENTINEL_ALL_TASKS_FAILED,
    SENTINEL_CANARY_FAILED, SENTINEL_NO_PROVIDER,
};
use modelmeter_backend::providers::{
    keypool::KeyPool, ChatRequest, ChatResult, ProviderAdapter, ProviderError, ProviderRegistry,
    FAIR_MAX_TOKENS, FAIR_TEMPERATURE,
};
use modelmeter_backend::sandbox::Evaluator;
use modelmeter_backend::store::ScoreStore;

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn canonical_solution(slug: &str) -> &'static str {
    match slug {
        "two-sum-indices" => {
            "def two_sum(nums, target):\n    seen = {}\n    for i, v in enumerate(nums):\n        if target - v in seen:\n            return [seen[target - v], i]\n        seen[v] = i\n    return []"
        }
        "reverse-words" => {
            "def reverse_words(s):\n    # split() collapses runs of whitespace\n    return ' '.join(s.split()[::-1])"
        }
        "balanced-brackets" => {
            "def is_balanced(s):\n    pairs = {')': '(', ']': '[', '}': '{'}\n    stack = []\n    for c in s:\n        if c in '([{':\n            stack.append(c)\n        elif c in pairs:\n            if not stack or stack.pop() != pairs[c]:\n                return False\n    return not stack"
        }
        "run-length-encode" => {
            "def rle_encode(s):\n    out = []\n    i = 0\n    while i < len(s):\n        j = i\n        while j < len(s) and s[j] == s[i]:\n            j += 1\n        out.append(s[i] + str(j - i))\n        i = j\n    return ''.join(out)"
        }
        "merge-intervals" => {
            "def merge_intervals(intervals):\n    merged = []\n    for start, end in sorted(intervals):\n        if merged and start <= merged[-1][1]:\n            merged[-1][1] = max(merged[-1][1], end)\n        else:\n            merged.append([start, end])\n    return merged"
        }
        "group-anagrams" => {
            "def group_anagrams(words):\n    groups = {}\n    for w in words:\n        groups.setdefault(''.join(sorted(w)), []).append(w)\n    out = [sorted(g) for g in groups.values()]\n    out.sort(key=lambda g: g[0])\n    return out"
        }
        "fix-binary-search" => {
            "def binary_search(arr, target):\n    lo, hi = 0, len(arr)\n    while lo < hi:\n        mid = (lo + hi) // 2\n        if arr[mid] == target:\n            return mid\n        elif arr[mid] < target:\n            lo = mid + 1\n        else:\n            hi = mid\n    return -1"
        }
        "lru-cache" => {
            "from collections import OrderedDict\n\nclass LRUCache:\n    def __init__(self, capacity):\n        self.capacity = capacity\n        self.data = OrderedDict()\n\n    def get(self, key):\n        if key not in self.data:\n            return -1\n        self.data.move_to_end(key)\n        return self.data[key]\n\n    def put(self, key, value):\n        if key in self.data:\n            self.data.move_to_end(key)\n        self.data[key] = value\n        if len(self.data) > self.capacity:\n            self.data.popitem(last=False)"
        }
        "dijkstra-shortest-path" => {
            "import heapq\n\ndef shortest_path(n, edges, src, dst):\n    adj = [[] for _ in range(n)]\n    for u, v, w in edges:\n        adj[u].append((v, w))\n    dist = [None] * n\n    heap = [(0, src)]\n    while heap:\n        d, node = heapq.heappop(heap)\n        if dist[node] is not None:\n            continue\n        dist[node] = d\n        for nxt, w in adj[node]:\n            if dist[nxt] is None:\n                heapq.heappush(heap, (d + w, nxt))\n    return -1 if dist[dst] is None else dist[dst]"
        }
        "fib-mod-optimize" => {
            "def fib_mod(n, m):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, (a + b) % m\n    return a % m"
        }
        other => panic!("no canonical solution for {other}"),
    }
}

/// Find which task a prompt belongs to and the alias it asks for. Canary
/// pings match no task and return `None`.
fn identify_task(prompt: &str) -> Option<(&'static str, &'static str, String)> {
    for task in catalogue::catalogue() {
        let needle = format!("{}_", task.expected_symbol);
        if let Some(start) = prompt.find(&needle) {
            let alias: String = prompt[start..]
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            return Some((task.slug, task.expected_symbol, alias));
        }
    }
    None
}

#[derive(Clone, Copy)]
enum StubMode {
    /// Correct fenced solution for every task.
    Canonical,
    /// Plain refusal, no code.
    Refusal,
    /// Fatal auth error on every call.
    AuthError,
    /// First `n` calls answer 503, then canonical.
    FlakyThenCanonical(u32),
}

struct StubAdapter {
    vendor: Vendor,
    mode: StubMode,
    keys_used: Mutex<Vec<String>>,
    calls: AtomicU32,
}

impl StubAdapter {
    fn new(vendor: Vendor, mode: StubMode) -> Arc<Self> {
        Arc::new(Self {
            vendor,
            mode,
            keys_used: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        })
    }

    fn keys_used(&self) -> Vec<String> {
        self.keys_used.lock().clone()
    }

    fn canonical_reply(req: &ChatRequest) -> ChatResult {
        let user = req
            .messages
            .iter()
            .find(|m| m.role == "user")
            .expect("user message present");
        let Some((slug, symbol, alias)) = identify_task(&user.content) else {
            // Canary ping.
            return ChatResult {
                text: "OK".to_string(),
                tokens_in: 8,
                tokens_out: 2,
            };
        };

        // Fairness property: every benchmark request carries the canonical
        // parameter set.
        assert!((req.temperature - FAIR_TEMPERATURE).abs() < 1e-9);
        assert!(req.max_tokens >= FAIR_MAX_TOKENS);

        let solution = canonical_solution(slug).replace(symbol, &alias);
        ChatResult {
            text: format!("```python\n{solution}\n```"),
            tokens_in: 120,
            tokens_out: 80,
        }
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn chat(&self, api_key: &str, req: &ChatRequest) -> Result<ChatResult, ProviderError> {
        self.keys_used.lock().push(api_key.to_string());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            StubMode::Canonical => Ok(Self::canonical_reply(req)),
            StubMode::Refusal => Ok(ChatResult {
                text: "I can't help.".to_string(),
                tokens_in: 10,
                tokens_out: 4,
            }),
            StubMode::AuthError => Err(ProviderError::Fatal {
                status: Some(401),
                message: "invalid api key".to_string(),
            }),
            StubMode::FlakyThenCanonical(failures) => {
                if call < failures {
                    Err(ProviderError::from_status(503, "temporarily overloaded"))
                } else {
                    Ok(Self::canonical_reply(req))
                }
            }
        }
    }

    async fn list_models(&self, _api_key: &str) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["stub-model".to_string()])
    }
}

fn test_config(trials: usize, canary: bool) -> Config {
    Config {
        database_path: ":memory:".to_string(),
        port: 0,
        calibration: ScoreCalibration::default(),
        batch_timestamp_override: Some("2026-08-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap()),
        canary_enabled: canary,
        trials_per_task: trials,
        tasks_per_sweep: 7,
        sandbox_python: "python3".to_string(),
    }
}

/// Store with exactly one visible stub model.
fn single_model_store() -> (ScoreStore, i64) {
    let store = ScoreStore::open_in_memory().unwrap();
    for model in store.all_models().unwrap() {
        store.set_show_in_rankings(model.id, false).unwrap();
    }
    let id = store
        .upsert_model("stub-model", Vendor::OpenAI, Some("Stub Model"))
        .unwrap();
    (store, id)
}

fn engine_with(
    store: &ScoreStore,
    adapter: Arc<StubAdapter>,
    keys: &[&str],
    config: &Config,
) -> Arc<Engine> {
    let mut adapters: HashMap<Vendor, Arc<dyn ProviderAdapter>> = HashMap::new();
    adapters.insert(adapter.vendor(), adapter);
    let mut key_map = HashMap::new();
    key_map.insert(
        Vendor::OpenAI,
        keys.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
    );
    let registry = ProviderRegistry::with_adapters(adapters, KeyPool::with_keys(key_map));
    let evaluator = Evaluator::new(config.sandbox_python.clone());
    Arc::new(Engine::new(store.clone(), registry, evaluator, config))
}

#[tokio::test]
async fn clean_sweep_produces_strong_score() {
    if !python_available() {
        eprintln!("skipping: python3 not on PATH");
        return;
    }
    let (store, model_id) = single_model_store();
    let config = test_config(2, true);
    let adapter = StubAdapter::new(Vendor::OpenAI, StubMode::Canonical);
    let engine = engine_with(&store, adapter, &["k0"], &config);

    let summary = engine.run_sweep().await.unwrap();
    assert_eq!(summary.scored, 1);
    assert_eq!(summary.sentinels, 0);

    let row = store.latest_valid_score(model_id, Suite::Hourly).unwrap().unwrap();
    assert!(row.stupid_score >= 72.0, "score {}", row.stupid_score);
    assert!(row.stupid_score <= 100.0);
    assert_eq!(row.axes.correctness, 1.0);
    assert_eq!(row.sample_size, Some(7));
    assert!(row.note.as_deref().unwrap_or("").contains("calibrating"));
    let width = row.confidence_upper.unwrap() - row.confidence_lower.unwrap();
    assert!(width <= 20.0, "ci width {width}");
    // One run row per surviving task.
    assert_eq!(store.health().unwrap().runs, 7);
}

#[tokio::test]
async fn refusing_model_gets_all_failed_sentinel() {
    let (store, model_id) = single_model_store();
    let config = test_config(2, false);
    let adapter = StubAdapter::new(Vendor::OpenAI, StubMode::Refusal);
    let engine = engine_with(&store, adapter, &["k0"], &config);

    let summary = engine.run_sweep().await.unwrap();
    assert_eq!(summary.sentinels, 1);

    let row = store.latest_row(model_id, Suite::Hourly).unwrap().unwrap();
    assert_eq!(row.stupid_score, SENTINEL_ALL_TASKS_FAILED);
    assert!(row
        .note
        .as_deref()
        .unwrap()
        .contains("All benchmark tasks failed"));
    for key in modelmeter_backend::models::AXIS_KEYS {
        assert_eq!(row.axes.get(key), Some(AXIS_PLACEHOLDER));
    }
    // No valid score exists.
    assert!(store.latest_valid_score(model_id, Suite::Hourly).unwrap().is_none());
}

#[tokio::test]
async fn missing_provider_writes_sentinel_once_then_preserves_scores() {
    let (store, model_id) = single_model_store();
    let config = test_config(2, false);
    // Registry with no adapters at all: provider unconfigured.
    let registry =
        ProviderRegistry::with_adapters(HashMap::new(), KeyPool::with_keys(HashMap::new()));
    let evaluator = Evaluator::new("python3");
    let engine = Arc::new(Engine::new(store.clone(), registry, evaluator, &config));

    // First sweep ever: the -999 sentinel is persisted.
    engine.run_sweep().await.unwrap();
    let row = store.latest_row(model_id, Suite::Hourly).unwrap().unwrap();
    assert_eq!(row.stupid_score, SENTINEL_NO_PROVIDER);

    // A later valid score must survive subsequent unconfigured sweeps.
    let mut axes = AxisVector::zero();
    axes.correctness = 0.9;
    store
        .insert_score(&NewScore {
            model_id,
            ts: Utc::now(),
            suite: Suite::Hourly,
            stupid_score: 77.0,
            axes,
            cusum: 0.0,
            note: None,
            confidence_lower: None,
            confidence_upper: None,
            standard_error: None,
            sample_size: Some(7),
            model_variance: None,
            synthetic: false,
        })
        .unwrap();
    let before = store.health().unwrap().scores;
    engine.run_sweep().await.unwrap();
    assert_eq!(store.health().unwrap().scores, before, "no new sentinel row");
    let latest = store.latest_valid_score(model_id, Suite::Hourly).unwrap().unwrap();
    assert_eq!(latest.stupid_score, 77.0);
}

#[tokio::test]
async fn key_rotation_follows_trial_index() {
    if !python_available() {
        eprintln!("skipping: python3 not on PATH");
        return;
    }
    let (store, _) = single_model_store();
    let mut config = test_config(5, false);
    config.tasks_per_sweep = 1;
    let adapter = StubAdapter::new(Vendor::OpenAI, StubMode::Canonical);
    let engine = engine_with(&store, Arc::clone(&adapter), &["k0", "k1"], &config);

    engine.run_sweep().await.unwrap();
    assert_eq!(adapter.keys_used(), vec!["k0", "k1", "k0", "k1", "k0"]);
}

#[tokio::test]
async fn backoff_retry_keeps_key_within_trial() {
    if !python_available() {
        eprintln!("skipping: python3 not on PATH");
        return;
    }
    let (store, model_id) = single_model_store();
    let mut config = test_config(2, false);
    config.tasks_per_sweep = 1;
    // First call 503s; the retry must reuse the same key.
    let adapter = StubAdapter::new(Vendor::OpenAI, StubMode::FlakyThenCanonical(1));
    let engine = engine_with(&store, Arc::clone(&adapter), &["k0", "k1"], &config);

    engine.run_sweep().await.unwrap();
    let keys = adapter.keys_used();
    assert_eq!(keys[0], "k0");
    assert_eq!(keys[1], "k0", "retry within trial 0 must not rotate keys");
    assert_eq!(keys[2], "k1");
    assert!(store.latest_valid_score(model_id, Suite::Hourly).unwrap().is_some());
}

#[tokio::test]
async fn fatal_canary_writes_canary_sentinel() {
    let (store, model_id) = single_model_store();
    let config = test_config(2, true);
    let adapter = StubAdapter::new(Vendor::OpenAI, StubMode::AuthError);
    let engine = engine_with(&store, adapter, &["k0"], &config);

    let summary = engine.run_sweep().await.unwrap();
    assert_eq!(summary.sentinels, 1);
    let row = store.latest_row(model_id, Suite::Hourly).unwrap().unwrap();
    assert_eq!(row.stupid_score, SENTINEL_CANARY_FAILED);
    assert!(row.note.as_deref().unwrap().contains("canary failed"));
}

#[tokio::test]
async fn degradation_series_raises_alert_and_change_point() {
    let (store, model_id) = single_model_store();
    let now = Utc::now();
    let series = [
        90.0, 90.0, 90.0, 90.0, 90.0, 88.0, 70.0, 68.0, 66.0, 65.0, 60.0, 55.0,
    ];
    for (i, &score) in series.iter().enumerate() {
        let age = series.len() - i;
        let mut axes = AxisVector::zero();
        axes.correctness = score / 100.0;
        axes.complexity = 0.6 * score / 100.0;
        axes.safety = 1.0;
        axes.format = 1.0;
        store
            .insert_score(&NewScore {
                model_id,
                ts: now - Duration::hours(age as i64),
                suite: Suite::Hourly,
                stupid_score: score,
                axes,
                cusum: 0.0,
                note: None,
                confidence_lower: None,
                confidence_upper: None,
                standard_error: None,
                sample_size: Some(7),
                model_variance: None,
                synthetic: false,
            })
            .unwrap();
    }

    let cache = DriftCache::new();
    let summary = drift::precompute_all(&store, &cache, now).unwrap();
    assert_eq!(summary.signatures, 1);
    assert!(summary.change_points >= 1);

    let signature = cache.get(model_id).unwrap();
    assert_eq!(signature.alert, AlertStatus::Alert);

    let points = store.change_points(model_id, 10).unwrap();
    assert!(!points.is_empty());
    assert_eq!(points[0].change_type, ChangeType::Degradation);
    assert!(points[0].affected_axes.iter().any(|a| a == "correctness"));

    // Re-running detection without new data stays idempotent.
    let again = drift::precompute_all(&store, &cache, now).unwrap();
    assert_eq!(again.change_points, 0);
}
