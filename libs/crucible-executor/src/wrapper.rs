//! Wrapper Synthesizer - Program-Text Assembly
//!
//! **Core Responsibility:**
//! Assemble the complete runnable program for one test: resource-limit
//! prologue, fixed imports, optional helper library, the submission
//! verbatim, and a harness that invokes the validated expression and
//! serializes the outcome.
//!
//! **Critical Properties:**
//! - Pure template assembly: no process spawning, fully unit-testable.
//! - Returns line offset/count metadata so errors can be mapped back to
//!   1-based lines of the submission.
//! - The result payload is written to stderr between two copies of a fresh
//!   random marker, so the evaluator can locate it even when the submission
//!   itself writes to stderr.

use anyhow::{Context, Result};
use crucible_common::config::ExecutorConfig;
use serde_json::Value;
use uuid::Uuid;

/// Data-structure helper library injected when the request asks for it.
/// Linked-list and binary-tree node types plus list<->structure converters;
/// `list_node_to_list` is cycle-safe, `tree_node` fills level-order with
/// `None` gaps, `tree_node_to_list` trims trailing `None`s.
pub const DATA_STRUCTURE_HELPERS: &str = r#"
from collections import deque

class ListNode:
    def __init__(self, val=0, next=None):
        self.val = val
        self.next = next

class TreeNode:
    def __init__(self, val=0, left=None, right=None):
        self.val = val
        self.left = left
        self.right = right

def list_node(values):
    if not values:
        return None
    head = ListNode(values[0])
    p = head
    for val in values[1:]:
        node = ListNode(val)
        p.next = node
        p = node
    return head

def list_node_to_list(head):
    if head is None:
        return None
    result = []
    seen = set()
    while head and id(head) not in seen:
        seen.add(id(head))
        result.append(head.val)
        head = head.next
    return result

def list_node_with_cycle(values, pos):
    if not values:
        return None
    head = list_node(values)
    if pos < 0:
        return head
    tail = head
    while tail.next:
        tail = tail.next
    target = head
    for _ in range(pos):
        target = target.next
    tail.next = target
    return head

def tree_node(values):
    if not values:
        return None
    root = TreeNode(values[0])
    i = 1
    queue = deque()
    queue.append(root)
    while queue and i < len(values):
        node = queue.popleft()
        if i < len(values) and values[i] is not None:
            node.left = TreeNode(values[i])
            queue.append(node.left)
        i += 1
        if i < len(values) and values[i] is not None:
            node.right = TreeNode(values[i])
            queue.append(node.right)
        i += 1
    return root

def tree_node_to_list(root):
    if root is None:
        return None
    result = []
    queue = deque([root])
    while queue:
        node = queue.popleft()
        if node:
            result.append(node.val)
            queue.append(node.left)
            queue.append(node.right)
        else:
            result.append(None)
    while result and result[-1] is None:
        result.pop()
    return result
"#;

/// Which rlimit the prologue uses for the memory ceiling. RLIMIT_AS is
/// unreliable on macOS, where the resident-set limit is enforced instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimitKind {
    AddressSpace,
    ResidentSet,
}

impl MemoryLimitKind {
    /// Resolved once from the compile-time target.
    pub fn for_host() -> Self {
        if cfg!(target_os = "macos") {
            MemoryLimitKind::ResidentSet
        } else {
            MemoryLimitKind::AddressSpace
        }
    }

    pub fn resource_name(self) -> &'static str {
        match self {
            MemoryLimitKind::AddressSpace => "RLIMIT_AS",
            MemoryLimitKind::ResidentSet => "RLIMIT_RSS",
        }
    }
}

/// A synthesized program plus the metadata needed to interpret its output.
#[derive(Debug, Clone)]
pub struct WrapperProgram {
    pub source: String,
    /// Number of generated lines before the first line of the submission.
    pub user_code_offset: usize,
    /// Line count of the submission itself.
    pub user_code_lines: usize,
    /// Random hex token delimiting the result payload on stderr.
    pub marker: String,
}

/// Python source that lowers the process's own ceilings before user code
/// runs. Best-effort: a soft limit above the hard ceiling falls back to the
/// hard ceiling, and unsupported limits are skipped.
pub fn resource_limits_prologue(config: &ExecutorConfig, memory_kind: MemoryLimitKind) -> String {
    format!(
        "import resource, sys
def _safe_setrlimit(res, limit):
    try:
        resource.setrlimit(res, (limit, limit))
    except ValueError:
        _, hard = resource.getrlimit(res)
        if hard > 0 and hard < limit:
            resource.setrlimit(res, (hard, hard))
_safe_setrlimit(resource.{mem_resource}, {mem_bytes})
_safe_setrlimit(resource.RLIMIT_CPU, {cpu_secs})
_safe_setrlimit(resource.RLIMIT_FSIZE, {fsize_bytes})
try:
    _safe_setrlimit(resource.RLIMIT_NPROC, 0)
except (AttributeError, OSError):
    pass
",
        mem_resource = memory_kind.resource_name(),
        mem_bytes = config.memory_limit_bytes,
        cpu_secs = config.cpu_time_limit_secs,
        fsize_bytes = config.max_file_size_bytes,
    )
}

/// Escape a JSON document for embedding inside a Python single-quoted
/// string literal. JSON itself only uses double quotes, but string values
/// may contain single quotes or backslashes that would break out.
fn escape_for_single_quoted(json: &str) -> String {
    json.replace('\\', "\\\\").replace('\'', "\\'")
}

/// One marker per synthesized program; 64 hex characters of randomness so
/// the submission cannot guess or collide with it.
fn fresh_marker() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Assemble the full program for one test.
///
/// `function_call` must already have passed the validator. The returned
/// offsets let the evaluator re-derive submission-relative line numbers
/// from traceback output.
pub fn synthesize(
    code: &str,
    function_call: &str,
    input: &Value,
    include_helpers: bool,
    config: &ExecutorConfig,
) -> Result<WrapperProgram> {
    let rlimit_code = resource_limits_prologue(config, MemoryLimitKind::for_host());
    let helper_code = if include_helpers { DATA_STRUCTURE_HELPERS } else { "" };
    let input_json =
        serde_json::to_string(input).context("failed to serialize test input")?;
    let safe_json = escape_for_single_quoted(&input_json);
    let marker = fresh_marker();

    let prologue = format!(
        "\n{rlimit_code}\nimport json\nimport time\nimport sys\nimport io\nimport os\nfrom typing import List, Optional, Dict, Tuple, Set\n\n{helper_code}\n\n"
    );
    let user_code_offset = prologue.matches('\n').count();
    let user_code_lines = code.matches('\n').count() + 1;

    let harness = format!(
        r#"if __name__ == "__main__":
    test_input = json.loads('{safe_json}')
    _captured = io.StringIO()
    sys.stdout = _captured
    sys.__stdout__ = _captured
    try:
        _devnull_fd = os.open(os.devnull, os.O_WRONLY)
        os.dup2(_devnull_fd, 1)
        os.close(_devnull_fd)
    except OSError:
        pass
    start = time.perf_counter()
    try:
        result = {function_call}
        elapsed = (time.perf_counter() - start) * 1000
        stdout_text = _captured.getvalue()
        _out = json.dumps({{"result": result, "runtime_ms": elapsed, "stdout": stdout_text}})
    except Exception as e:
        import traceback as _tb
        _frames = _tb.extract_tb(sys.exc_info()[2])
        _line = ""
        for _f in reversed(_frames):
            _adj = _f.lineno - {user_code_offset}
            if 0 < _adj <= {user_code_lines}:
                _line = f" (line {{_adj}})"
                break
        stdout_text = _captured.getvalue()
        _out = json.dumps({{"error": str(e) + _line, "stdout": stdout_text}})
    sys.stderr.write("{marker}" + _out + "{marker}")
"#
    );

    let source = format!("{prologue}{code}\n\n{harness}");

    Ok(WrapperProgram {
        source,
        user_code_offset,
        user_code_lines,
        marker,
    })
}
