//! Property-based fuzz case generators.
//!
//! Each task gets hidden cases generated from a slug-fixed seed, with the
//! expected outputs computed by Rust reference solutions. Generators emit
//! `(input, expected)` Python literals matching the fixed-case convention.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::collections::{BinaryHeap, HashMap};

/// Slug-fixed RNG so fuzz material is stable across evaluations and
/// engine restarts.
pub fn rng_for_slug(slug: &str) -> ChaCha8Rng {
    let digest = Sha256::digest(slug.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    ChaCha8Rng::seed_from_u64(u64::from_le_bytes(seed))
}

fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn py_int_list(items: &[i64]) -> String {
    let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn py_pair_list(items: &[(i64, i64)]) -> String {
    let parts: Vec<String> = items.iter().map(|(a, b)| format!("[{a}, {b}]")).collect();
    format!("[{}]", parts.join(", "))
}

fn py_str_list(items: &[String]) -> String {
    let parts: Vec<String> = items.iter().map(|s| py_str(s)).collect();
    format!("[{}]", parts.join(", "))
}

fn random_word(rng: &mut ChaCha8Rng, min: usize, max: usize) -> String {
    let len = rng.gen_range(min..=max);
    (0..len)
        .map(|_| (b'a' + rng.gen_range(0..26u8)) as char)
        .collect()
}

pub fn fuzz_two_sum(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    let mut cases = Vec::with_capacity(n);
    while cases.len() < n {
        let len = rng.gen_range(5..=14);
        let mut nums: Vec<i64> = Vec::with_capacity(len);
        while nums.len() < len {
            let v = rng.gen_range(-50..=50);
            if !nums.contains(&v) {
                nums.push(v);
            }
        }
        let i = rng.gen_range(0..len - 1);
        let j = rng.gen_range(i + 1..len);
        let target = nums[i] + nums[j];
        let mut pairs = 0;
        for a in 0..len {
            for b in a + 1..len {
                if nums[a] + nums[b] == target {
                    pairs += 1;
                }
            }
        }
        if pairs != 1 {
            continue;
        }
        cases.push((
            format!("({}, {})", py_int_list(&nums), target),
            format!("[{i}, {j}]"),
        ));
    }
    cases
}

pub fn fuzz_reverse_words(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| {
            let count = rng.gen_range(0..=7);
            let words: Vec<String> = (0..count).map(|_| random_word(rng, 1, 8)).collect();
            let mut input = String::new();
            if rng.gen_bool(0.3) {
                input.push_str(&" ".repeat(rng.gen_range(1..=3)));
            }
            for (idx, w) in words.iter().enumerate() {
                if idx > 0 {
                    input.push_str(&" ".repeat(rng.gen_range(1..=3)));
                }
                input.push_str(w);
            }
            if rng.gen_bool(0.3) {
                input.push_str(&" ".repeat(rng.gen_range(1..=3)));
            }
            let mut reversed = words.clone();
            reversed.reverse();
            (
                format!("({},)", py_str(&input)),
                py_str(&reversed.join(" ")),
            )
        })
        .collect()
}

fn gen_balanced(rng: &mut ChaCha8Rng, pairs: usize) -> String {
    // Random well-formed bracket string by tracking the open stack.
    let opens = ['(', '[', '{'];
    let close_of = |c: char| match c {
        '(' => ')',
        '[' => ']',
        _ => '}',
    };
    let mut out = String::new();
    let mut stack: Vec<char> = Vec::new();
    let mut remaining = pairs;
    while remaining > 0 || !stack.is_empty() {
        let can_open = remaining > 0;
        let can_close = !stack.is_empty();
        if can_open && (!can_close || rng.gen_bool(0.55)) {
            let c = opens[rng.gen_range(0..3)];
            out.push(c);
            stack.push(c);
            remaining -= 1;
        } else if let Some(c) = stack.pop() {
            out.push(close_of(c));
        }
    }
    out
}

fn is_balanced_ref(s: &str) -> bool {
    let mut stack = Vec::new();
    for c in s.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

pub fn fuzz_balanced(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| {
            let depth = rng.gen_range(1..=8);
            let mut s = gen_balanced(rng, depth);
            if rng.gen_bool(0.5) && !s.is_empty() {
                // Corrupt: drop or flip one character.
                let pos = rng.gen_range(0..s.len());
                if rng.gen_bool(0.5) {
                    s.remove(pos);
                } else {
                    s.replace_range(pos..pos + 1, if rng.gen_bool(0.5) { ")" } else { "(" });
                }
            }
            let expected = if is_balanced_ref(&s) { "True" } else { "False" };
            (format!("({},)", py_str(&s)), expected.to_string())
        })
        .collect()
}

fn rle_ref(s: &str) -> String {
    let mut out = String::new();
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let mut j = i;
        while j < chars.len() && chars[j] == chars[i] {
            j += 1;
        }
        out.push(chars[i]);
        out.push_str(&(j - i).to_string());
        i = j;
    }
    out
}

pub fn fuzz_rle(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| {
            let runs = rng.gen_range(1..=8);
            let mut s = String::new();
            let mut last = ' ';
            for _ in 0..runs {
                let mut c = (b'a' + rng.gen_range(0..5u8)) as char;
                while c == last {
                    c = (b'a' + rng.gen_range(0..5u8)) as char;
                }
                last = c;
                for _ in 0..rng.gen_range(1..=9) {
                    s.push(c);
                }
            }
            (format!("({},)", py_str(&s)), py_str(&rle_ref(&s)))
        })
        .collect()
}

fn merge_intervals_ref(mut intervals: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    intervals.sort_unstable();
    let mut merged: Vec<(i64, i64)> = Vec::new();
    for (start, end) in intervals {
        match merged.last_mut() {
            Some((_, prev_end)) if start <= *prev_end => {
                *prev_end = (*prev_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

pub fn fuzz_merge_intervals(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| {
            let count = rng.gen_range(1..=9);
            let intervals: Vec<(i64, i64)> = (0..count)
                .map(|_| {
                    let start = rng.gen_range(-20..=80);
                    (start, start + rng.gen_range(0..=10))
                })
                .collect();
            let merged = merge_intervals_ref(intervals.clone());
            (
                format!("({},)", py_pair_list(&intervals)),
                py_pair_list(&merged),
            )
        })
        .collect()
}

fn group_anagrams_ref(words: &[String]) -> Vec<Vec<String>> {
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for w in words {
        let mut key: Vec<char> = w.chars().collect();
        key.sort_unstable();
        groups.entry(key.into_iter().collect()).or_default().push(w.clone());
    }
    let mut out: Vec<Vec<String>> = groups
        .into_values()
        .map(|mut g| {
            g.sort();
            g
        })
        .collect();
    out.sort_by(|a, b| a[0].cmp(&b[0]));
    out
}

pub fn fuzz_group_anagrams(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| {
            let base_count = rng.gen_range(1..=4);
            let mut words = Vec::new();
            for _ in 0..base_count {
                let base = random_word(rng, 3, 6);
                let members = rng.gen_range(1..=3);
                for _ in 0..members {
                    let mut chars: Vec<char> = base.chars().collect();
                    // Fisher-Yates shuffle for a random anagram.
                    for i in (1..chars.len()).rev() {
                        let j = rng.gen_range(0..=i);
                        chars.swap(i, j);
                    }
                    let w: String = chars.into_iter().collect();
                    if !words.contains(&w) {
                        words.push(w);
                    }
                }
            }
            let grouped = group_anagrams_ref(&words);
            let grouped_lit: Vec<String> = grouped.iter().map(|g| py_str_list(g)).collect();
            (
                format!("({},)", py_str_list(&words)),
                format!("[{}]", grouped_lit.join(", ")),
            )
        })
        .collect()
}

pub fn fuzz_binary_search(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| {
            let len = rng.gen_range(0..=20);
            let mut arr: Vec<i64> = Vec::with_capacity(len);
            let mut next = rng.gen_range(-30..=0);
            for _ in 0..len {
                next += rng.gen_range(1..=6);
                arr.push(next);
            }
            let (target, expected) = if !arr.is_empty() && rng.gen_bool(0.6) {
                let idx = rng.gen_range(0..arr.len());
                (arr[idx], idx as i64)
            } else {
                let mut t = rng.gen_range(-40..=120);
                while arr.contains(&t) {
                    t += 1;
                }
                (t, -1)
            };
            (
                format!("({}, {})", py_int_list(&arr), target),
                expected.to_string(),
            )
        })
        .collect()
}

fn lru_ref(capacity: usize, ops: &[(bool, i64, i64)]) -> Vec<Option<i64>> {
    // (is_put, key, value); order vec front = least recently used.
    let mut order: Vec<i64> = Vec::new();
    let mut map: HashMap<i64, i64> = HashMap::new();
    let mut results = Vec::with_capacity(ops.len());
    for &(is_put, key, value) in ops {
        if is_put {
            if map.contains_key(&key) {
                map.insert(key, value);
                order.retain(|&k| k != key);
                order.push(key);
            } else {
                if map.len() == capacity {
                    let evicted = order.remove(0);
                    map.remove(&evicted);
                }
                map.insert(key, value);
                order.push(key);
            }
            results.push(None);
        } else {
            match map.get(&key).copied() {
                Some(v) => {
                    order.retain(|&k| k != key);
                    order.push(key);
                    results.push(Some(v));
                }
                None => results.push(Some(-1)),
            }
        }
    }
    results
}

pub fn fuzz_lru(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| {
            let capacity = rng.gen_range(1..=4);
            let op_count = rng.gen_range(5..=14);
            let ops: Vec<(bool, i64, i64)> = (0..op_count)
                .map(|_| {
                    (
                        rng.gen_bool(0.55),
                        rng.gen_range(1..=6),
                        rng.gen_range(1..=99),
                    )
                })
                .collect();
            let results = lru_ref(capacity, &ops);
            let ops_lit: Vec<String> = ops
                .iter()
                .map(|&(is_put, k, v)| {
                    if is_put {
                        format!("['put', [{k}, {v}]]")
                    } else {
                        format!("['get', [{k}]]")
                    }
                })
                .collect();
            let results_lit: Vec<String> = results
                .iter()
                .map(|r| match r {
                    Some(v) => v.to_string(),
                    None => "None".to_string(),
                })
                .collect();
            (
                format!("({capacity}, [{}])", ops_lit.join(", ")),
                format!("[{}]", results_lit.join(", ")),
            )
        })
        .collect()
}

fn dijkstra_ref(n: usize, edges: &[(usize, usize, i64)], src: usize, dst: usize) -> i64 {
    let mut adj: Vec<Vec<(usize, i64)>> = vec![Vec::new(); n];
    for &(u, v, w) in edges {
        adj[u].push((v, w));
    }
    let mut dist = vec![i64::MAX; n];
    dist[src] = 0;
    // Max-heap of negated costs.
    let mut heap: BinaryHeap<(i64, usize)> = BinaryHeap::new();
    heap.push((0, src));
    while let Some((neg_cost, node)) = heap.pop() {
        let cost = -neg_cost;
        if cost > dist[node] {
            continue;
        }
        for &(next, w) in &adj[node] {
            let candidate = cost + w;
            if candidate < dist[next] {
                dist[next] = candidate;
                heap.push((-candidate, next));
            }
        }
    }
    if dist[dst] == i64::MAX {
        -1
    } else {
        dist[dst]
    }
}

pub fn fuzz_dijkstra(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| {
            let nodes = rng.gen_range(4..=9);
            let edge_count = rng.gen_range(nodes..=nodes * 3);
            let edges: Vec<(usize, usize, i64)> = (0..edge_count)
                .map(|_| {
                    (
                        rng.gen_range(0..nodes),
                        rng.gen_range(0..nodes),
                        rng.gen_range(0..=20),
                    )
                })
                .collect();
            let expected = dijkstra_ref(nodes, &edges, 0, nodes - 1);
            let edges_lit: Vec<String> = edges
                .iter()
                .map(|&(u, v, w)| format!("[{u}, {v}, {w}]"))
                .collect();
            (
                format!("({nodes}, [{}], 0, {})", edges_lit.join(", "), nodes - 1),
                expected.to_string(),
            )
        })
        .collect()
}

fn fib_mod_ref(n: u64, m: u64) -> u64 {
    if m == 1 {
        return 0;
    }
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = (a + b) % m;
        a = b;
        b = next;
    }
    a
}

pub fn fuzz_fib_mod(rng: &mut ChaCha8Rng, n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|_| {
            let arg_n = rng.gen_range(1_000..=200_000u64);
            let m = rng.gen_range(2..=1_000_000_007u64);
            (
                format!("({arg_n}, {m})"),
                fib_mod_ref(arg_n, m).to_string(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_rng_is_stable() {
        let a: u64 = rng_for_slug("two-sum-indices").gen();
        let b: u64 = rng_for_slug("two-sum-indices").gen();
        let c: u64 = rng_for_slug("reverse-words").gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn balanced_reference_agrees_with_generator() {
        let mut rng = rng_for_slug("balanced-brackets");
        for _ in 0..50 {
            let s = gen_balanced(&mut rng, 6);
            assert!(is_balanced_ref(&s), "generated unbalanced: {s}");
        }
    }

    #[test]
    fn rle_reference() {
        assert_eq!(rle_ref("aaabcc"), "a3b1c2");
        assert_eq!(rle_ref(""), "");
        assert_eq!(rle_ref("z"), "z1");
    }

    #[test]
    fn merge_reference_handles_touching() {
        let merged = merge_intervals_ref(vec![(1, 4), (4, 5), (7, 8)]);
        assert_eq!(merged, vec![(1, 5), (7, 8)]);
    }

    #[test]
    fn lru_reference_evicts_least_recent() {
        let results = lru_ref(
            2,
            &[
                (true, 1, 1),
                (true, 2, 2),
                (false, 1, 0),
                (true, 3, 3),
                (false, 2, 0),
                (false, 3, 0),
            ],
        );
        assert_eq!(
            results,
            vec![None, None, Some(1), None, Some(-1), Some(3)]
        );
    }

    #[test]
    fn dijkstra_reference() {
        let edges = vec![(0, 1, 1), (1, 2, 2), (0, 2, 5), (2, 3, 1)];
        assert_eq!(dijkstra_ref(4, &edges, 0, 3), 4);
        assert_eq!(dijkstra_ref(3, &[(0, 1, 4)], 0, 2), -1);
    }

    #[test]
    fn fib_mod_reference() {
        assert_eq!(fib_mod_ref(0, 97), 0);
        assert_eq!(fib_mod_ref(10, 1000), 55);
        assert_eq!(fib_mod_ref(30, 100000), 32040);
        assert_eq!(fib_mod_ref(90, 1_000_000_000), 370_816_120);
    }

}
