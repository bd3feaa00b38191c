//! Deterministic generation of the Python evaluation harness.
//!
//! The harness source is rebuilt per evaluation from the task definition and
//! the candidate code, then handed to the subprocess runner. Inside the
//! child it arms a 5 second alarm, blocks dangerous imports behind an
//! `__import__` hook, replaces `os` with a narrow proxy, forbids write-mode
//! `open`, executes the candidate, and drives the test cases with
//! `ast.literal_eval`; the verdict is a single JSON line on stdout.

use crate::catalogue::Driver;

/// Wall-clock alarm armed inside the harness, seconds.
pub const ALARM_SECONDS: u32 = 5;

/// Render the harness source for one evaluation.
///
/// `cases` are `(input_literal, expected_literal)` pairs; `scratch` is the
/// only absolute path prefix the candidate may read from.
pub fn render(
    code: &str,
    symbol: &str,
    driver: Driver,
    cases: &[(String, String)],
    scratch: &str,
) -> String {
    let code_lit = serde_json::to_string(code).expect("string encodes");
    let symbol_lit = serde_json::to_string(symbol).expect("string encodes");
    let scratch_lit = serde_json::to_string(scratch).expect("string encodes");
    let case_pairs: Vec<[&str; 2]> = cases
        .iter()
        .map(|(i, e)| [i.as_str(), e.as_str()])
        .collect();
    let cases_lit = serde_json::to_string(&case_pairs).expect("cases encode");
    let driver_lit = match driver {
        Driver::Call => "\"call\"",
        Driver::ClassSequence => "\"class_sequence\"",
    };

    format!(
        r#"import ast
import builtins
import io
import json
import signal
import sys
import types
import os as _real_os

CODE = {code_lit}
SYMBOL = {symbol_lit}
SCRATCH = {scratch_lit}
CASES = {cases_lit}
DRIVER = {driver_lit}

RESULT = {{"compiled": False, "symbol_present": False, "passed": 0, "total": len(CASES), "error": None}}
_exit = _real_os._exit
_stdout = sys.stdout


def _emit():
    _stdout.write(json.dumps(RESULT) + "\n")
    _stdout.flush()


def _on_alarm(signum, frame):
    RESULT["error"] = "timeout"
    _emit()
    _exit(1)


signal.signal(signal.SIGALRM, _on_alarm)
signal.alarm({ALARM_SECONDS})

_BANNED = {{"subprocess", "socket", "urllib", "requests", "http", "ftplib", "smtplib", "shutil", "pathlib"}}
_OS_PROXY = types.SimpleNamespace(
    urandom=_real_os.urandom,
    name=_real_os.name,
    path=_real_os.path,
    sep=_real_os.sep,
    linesep=_real_os.linesep,
)
_real_import = builtins.__import__


def _guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    root = name.split(".")[0]
    if root in _BANNED:
        raise ImportError("import of %s is blocked" % root)
    if root == "os":
        return _OS_PROXY
    return _real_import(name, globals, locals, fromlist, level)


_real_open = builtins.open


def _guarded_open(file, mode="r", *args, **kwargs):
    m = str(mode)
    if any(flag in m for flag in ("w", "a", "x", "+")):
        raise PermissionError("write access is blocked")
    p = str(file)
    if p.startswith("/") and not p.startswith(SCRATCH):
        raise PermissionError("path outside scratch directory")
    return _real_open(file, mode, *args, **kwargs)


builtins.__import__ = _guarded_import
builtins.open = _guarded_open


def _norm(value):
    if isinstance(value, tuple):
        return [_norm(v) for v in value]
    if isinstance(value, list):
        return [_norm(v) for v in value]
    return value


_ns = {{}}
_sink = io.StringIO()
sys.stdout = _sink
try:
    _compiled = compile(CODE, "<candidate>", "exec")
    RESULT["compiled"] = True
    exec(_compiled, _ns)
except BaseException as e:
    sys.stdout = _stdout
    RESULT["error"] = "exec: %s: %s" % (type(e).__name__, e)
    _emit()
    _exit(0)
sys.stdout = _stdout

_target = _ns.get(SYMBOL)
if not callable(_target):
    RESULT["error"] = "expected symbol %s not defined" % SYMBOL
    _emit()
    _exit(0)
RESULT["symbol_present"] = True

for _inp, _exp in CASES:
    try:
        _args = ast.literal_eval(_inp)
        _expected = ast.literal_eval(_exp)
        if not isinstance(_args, tuple):
            _args = (_args,)
        sys.stdout = _sink
        try:
            if DRIVER == "class_sequence":
                _obj = _target(*_args[:-1])
                _actual = []
                for _name, _call_args in _args[-1]:
                    _actual.append(getattr(_obj, _name)(*_call_args))
            else:
                _actual = _target(*_args)
        finally:
            sys.stdout = _stdout
        if _norm(_actual) == _norm(_expected):
            RESULT["passed"] += 1
    except BaseException as e:
        if RESULT["error"] is None:
            RESULT["error"] = "case: %s: %s" % (type(e).__name__, e)

_emit()
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_embedded_material() {
        let cases = vec![("(1,)".to_string(), "2".to_string())];
        let src = render("def inc(x):\n    return x + 1\n", "inc", Driver::Call, &cases, "/tmp/x");
        assert!(src.contains("SYMBOL = \"inc\""));
        assert!(src.contains("signal.alarm(5)"));
        assert!(src.contains("\"(1,)\""));
        assert!(src.contains("DRIVER = \"call\""));
    }

    #[test]
    fn escapes_hostile_code_strings() {
        // A candidate containing quotes and backslashes must not break the
        // harness source.
        let code = "def f():\n    return \"quote \\\" and backslash \\\\\"";
        let src = render(code, "f", Driver::Call, &[], "/tmp/x");
        assert!(src.contains("CODE = \""));
        assert!(!src.contains("\"\"\""));
    }

    #[test]
    fn class_sequence_driver_selected() {
        let src = render("class C: pass", "C", Driver::ClassSequence, &[], "/tmp/x");
        assert!(src.contains("DRIVER = \"class_sequence\""));
    }
}
