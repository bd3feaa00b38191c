//! Fixed benchmark task catalogue.
//!
//! Ten Python code-generation tasks across three difficulty tiers, covering
//! implementation, debugging, and optimisation. The catalogue is immutable
//! at runtime; changing a task means introducing a new slug.
//!
//! Fixed test cases are `(input, expected)` Python literals; the sandbox
//! parses them with `ast.literal_eval`. Inputs are argument tuples. Fuzz
//! cases are generated per evaluation from a slug-fixed seed by the
//! generators in [`fuzz`], which carry Rust reference solutions.

pub mod fuzz;

use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Complexity-axis value granted when the submission parses and defines
    /// the expected symbol.
    pub fn complexity_value(&self) -> f64 {
        match self {
            Difficulty::Easy => 0.3,
            Difficulty::Medium => 0.6,
            Difficulty::Hard => 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Implement,
    Debug,
    Optimize,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Implement => "implement",
            TaskKind::Debug => "debug",
            TaskKind::Optimize => "optimize",
        }
    }
}

/// How the sandbox drives the expected symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// `symbol(*args)` per test case.
    Call,
    /// `obj = symbol(*init_args)`, then a method-call sequence; expected is
    /// the list of every call's return value.
    ClassSequence,
}

type FuzzFn = fn(&mut ChaCha8Rng, usize) -> Vec<(String, String)>;

pub struct TaskDef {
    pub slug: &'static str,
    pub difficulty: Difficulty,
    pub kind: TaskKind,
    pub driver: Driver,
    pub prompt: &'static str,
    pub expected_symbol: &'static str,
    pub test_cases: &'static [(&'static str, &'static str)],
    pub fuzz: FuzzFn,
}

impl TaskDef {
    /// All test material for one evaluation: fixed cases first, then fuzz
    /// cases from the slug-fixed seed.
    pub fn all_cases(&self, fuzz_count: usize) -> Vec<(String, String)> {
        let mut cases: Vec<(String, String)> = self
            .test_cases
            .iter()
            .map(|(i, e)| (i.to_string(), e.to_string()))
            .collect();
        let mut rng = fuzz::rng_for_slug(self.slug);
        cases.extend((self.fuzz)(&mut rng, fuzz_count));
        cases
    }
}

/// The fixed, ordered catalogue.
pub fn catalogue() -> &'static [TaskDef] {
    &TASKS
}

pub fn task_by_slug(slug: &str) -> Option<&'static TaskDef> {
    TASKS.iter().find(|t| t.slug == slug)
}

static TASKS: [TaskDef; 10] = [
    TaskDef {
        slug: "two-sum-indices",
        difficulty: Difficulty::Easy,
        kind: TaskKind::Implement,
        driver: Driver::Call,
        prompt: "Write a Python function `two_sum(nums, target)` that takes a list of \
integers and a target integer, and returns a list `[i, j]` with `i < j` such that \
`nums[i] + nums[j] == target`. Exactly one such pair exists in every input. \
Aim for better than quadratic time.",
        expected_symbol: "two_sum",
        test_cases: &[
            ("([2, 7, 11, 15], 9)", "[0, 1]"),
            ("([3, 2, 4], 6)", "[1, 2]"),
            ("([-1, 0, 1, 2], 3)", "[2, 3]"),
            ("([5, 5], 10)", "[0, 1]"),
        ],
        fuzz: fuzz::fuzz_two_sum,
    },
    TaskDef {
        slug: "reverse-words",
        difficulty: Difficulty::Easy,
        kind: TaskKind::Implement,
        driver: Driver::Call,
        prompt: "Write a Python function `reverse_words(s)` that reverses the order of \
words in the string `s`. Words are runs of non-space characters. The result must \
contain the words separated by single spaces, with no leading or trailing \
whitespace, regardless of how much whitespace the input contains.",
        expected_symbol: "reverse_words",
        test_cases: &[
            ("('the sky is blue',)", "'blue is sky the'"),
            ("('  hello   world  ',)", "'world hello'"),
            ("('a',)", "'a'"),
            ("('',)", "''"),
        ],
        fuzz: fuzz::fuzz_reverse_words,
    },
    TaskDef {
        slug: "balanced-brackets",
        difficulty: Difficulty::Easy,
        kind: TaskKind::Implement,
        driver: Driver::Call,
        prompt: "Write a Python function `is_balanced(s)` that returns True when every \
bracket in `s` is matched and properly nested, and False otherwise. The bracket \
pairs are `()`, `[]` and `{}`; every other character may be ignored.",
        expected_symbol: "is_balanced",
        test_cases: &[
            ("('()[]{}',)", "True"),
            ("('([{}])',)", "True"),
            ("('(]',)", "False"),
            ("('(',)", "False"),
            ("('a(b)c',)", "True"),
        ],
        fuzz: fuzz::fuzz_balanced,
    },
    TaskDef {
        slug: "run-length-encode",
        difficulty: Difficulty::Medium,
        kind: TaskKind::Implement,
        driver: Driver::Call,
        prompt: "Write a Python function `rle_encode(s)` that run-length encodes the \
string `s`: each maximal run of a repeated character becomes the character followed \
by the run length. For example `'aaabcc'` encodes to `'a3b1c2'`. The empty string \
encodes to the empty string.",
        expected_symbol: "rle_encode",
        test_cases: &[
            ("('aaabcc',)", "'a3b1c2'"),
            ("('abc',)", "'a1b1c1'"),
            ("('zzzzzz',)", "'z6'"),
            ("('',)", "''"),
        ],
        fuzz: fuzz::fuzz_rle,
    },
    TaskDef {
        slug: "merge-intervals",
        difficulty: Difficulty::Medium,
        kind: TaskKind::Implement,
        driver: Driver::Call,
        prompt: "Write a Python function `merge_intervals(intervals)` that takes a list \
of closed integer intervals `[start, end]` in arbitrary order and returns the \
minimal list of merged intervals sorted by start. Intervals that touch (one ends \
where the next begins) must be merged as well.",
        expected_symbol: "merge_intervals",
        test_cases: &[
            ("([[1, 3], [2, 6], [8, 10], [15, 18]],)", "[[1, 6], [8, 10], [15, 18]]"),
            ("([[1, 4], [4, 5]],)", "[[1, 5]]"),
            ("([[5, 7]],)", "[[5, 7]]"),
            ("([],)", "[]"),
        ],
        fuzz: fuzz::fuzz_merge_intervals,
    },
    TaskDef {
        slug: "group-anagrams",
        difficulty: Difficulty::Medium,
        kind: TaskKind::Implement,
        driver: Driver::Call,
        prompt: "Write a Python function `group_anagrams(words)` that groups the words \
that are anagrams of each other. Return the groups as a list of lists, with each \
group sorted alphabetically and the groups ordered by their first word.",
        expected_symbol: "group_anagrams",
        test_cases: &[
            (
                "(['eat', 'tea', 'tan', 'ate', 'nat', 'bat'],)",
                "[['ate', 'eat', 'tea'], ['bat'], ['nat', 'tan']]",
            ),
            ("(['abc'],)", "[['abc']]"),
            ("([],)", "[]"),
        ],
        fuzz: fuzz::fuzz_group_anagrams,
    },
    TaskDef {
        slug: "fix-binary-search",
        difficulty: Difficulty::Medium,
        kind: TaskKind::Debug,
        driver: Driver::Call,
        prompt: "The following Python function is supposed to return the index of \
`target` in the sorted list `arr`, or -1 when absent, but it hangs or returns wrong \
answers on some inputs. Fix it and return the corrected `binary_search` function.\n\n\
```python\ndef binary_search(arr, target):\n    lo, hi = 0, len(arr)\n    while lo < hi:\n        \
mid = (lo + hi) // 2\n        if arr[mid] == target:\n            return mid\n        \
elif arr[mid] < target:\n            lo = mid\n        else:\n            hi = mid\n    \
return -1\n```",
        expected_symbol: "binary_search",
        test_cases: &[
            ("([1, 3, 5, 7, 9], 7)", "3"),
            ("([1, 3, 5, 7, 9], 4)", "-1"),
            ("([], 1)", "-1"),
            ("([2], 2)", "0"),
            ("([1, 2], 2)", "1"),
        ],
        fuzz: fuzz::fuzz_binary_search,
    },
    TaskDef {
        slug: "lru-cache",
        difficulty: Difficulty::Hard,
        kind: TaskKind::Implement,
        driver: Driver::ClassSequence,
        prompt: "Write a Python class `LRUCache` implementing a least-recently-used \
cache. `LRUCache(capacity)` creates a cache holding at most `capacity` entries. \
`get(key)` returns the stored value or -1 and counts as a use. `put(key, value)` \
inserts or updates the entry, evicting the least recently used entry when the \
cache is full. Both operations must run in O(1) average time.",
        expected_symbol: "LRUCache",
        test_cases: &[
            (
                "(2, [['put', [1, 1]], ['put', [2, 2]], ['get', [1]], ['put', [3, 3]], \
['get', [2]], ['get', [3]]])",
                "[None, None, 1, None, -1, 3]",
            ),
            (
                "(1, [['put', [1, 1]], ['get', [1]], ['put', [2, 2]], ['get', [1]], ['get', [2]]])",
                "[None, 1, None, -1, 2]",
            ),
        ],
        fuzz: fuzz::fuzz_lru,
    },
    TaskDef {
        slug: "dijkstra-shortest-path",
        difficulty: Difficulty::Hard,
        kind: TaskKind::Implement,
        driver: Driver::Call,
        prompt: "Write a Python function `shortest_path(n, edges, src, dst)` for a \
directed graph with `n` nodes numbered 0..n-1. `edges` is a list of `[u, v, w]` \
entries meaning an edge from `u` to `v` with non-negative integer weight `w`. \
Return the total weight of the cheapest path from `src` to `dst`, or -1 when no \
path exists. The graph can be large, so use an efficient algorithm.",
        expected_symbol: "shortest_path",
        test_cases: &[
            ("(4, [[0, 1, 1], [1, 2, 2], [0, 2, 5], [2, 3, 1]], 0, 3)", "4"),
            ("(3, [[0, 1, 4]], 0, 2)", "-1"),
            ("(2, [], 0, 0)", "0"),
            ("(5, [[0, 1, 10], [0, 2, 3], [2, 1, 2], [1, 3, 1], [2, 3, 9]], 0, 3)", "6"),
        ],
        fuzz: fuzz::fuzz_dijkstra,
    },
    TaskDef {
        slug: "fib-mod-optimize",
        difficulty: Difficulty::Hard,
        kind: TaskKind::Optimize,
        driver: Driver::Call,
        prompt: "The naive implementation below computes the n-th Fibonacci number \
modulo m in exponential time. Rewrite `fib_mod` so it handles n up to 1,000,000 \
well inside a two-second CPU budget, returning the same values.\n\n\
```python\ndef fib_mod(n, m):\n    if n < 2:\n        return n % m\n    \
return (fib_mod(n - 1, m) + fib_mod(n - 2, m)) % m\n```",
        expected_symbol: "fib_mod",
        test_cases: &[
            ("(0, 97)", "0"),
            ("(1, 97)", "1"),
            ("(10, 1000)", "55"),
            ("(30, 100000)", "32040"),
            ("(90, 1000000000)", "370816120"),
        ],
        fuzz: fuzz::fuzz_fib_mod,
    },
];
