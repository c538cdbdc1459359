//! Python cell execution (§4.4) against a shared, persistent namespace. The
//! namespace lives inside the kernel process's own CPython interpreter
//! (embedded via `pyo3`), so execution never crosses a process boundary —
//! the kernel *is* the process boundary (§4.5, §9).

use super::ExecutionOutcome;
use crate::converter;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};

pub fn execute_python(py: Python<'_>, source: &str, namespace: &Bound<'_, PyDict>) -> ExecutionOutcome {
    let ast = match py.import("ast") {
        Ok(m) => m,
        Err(e) => return ("".to_string(), Vec::new(), Some(format!("internal error: {e}"))),
    };

    let tree = match ast.call_method1("parse", (source, "<cell>", "exec")) {
        Ok(tree) => tree,
        Err(e) => return ("".to_string(), Vec::new(), Some(format_syntax_error(py, &e))),
    };

    let (leading_module, trailing_expr) = match split_trailing_expression(&ast, &tree) {
        Ok(parts) => parts,
        Err(e) => return ("".to_string(), Vec::new(), Some(format!("internal error: {e}"))),
    };

    let stdout_capture = StdCapture::install(py, "stdout");
    let stderr_capture = StdCapture::install(py, "stderr");

    let mut outputs = Vec::new();
    let mut error: Option<String> = None;

    let builtins = PyModule::import(py, "builtins").ok();
    let run = || -> PyResult<()> {
        let builtins = builtins.as_ref().ok_or_else(|| {
            pyo3::exceptions::PyRuntimeError::new_err("builtins module unavailable")
        })?;
        let compile = builtins.getattr("compile")?;
        let exec_fn = builtins.getattr("exec")?;
        let eval_fn = builtins.getattr("eval")?;

        let leading_code = compile.call1((leading_module, "<cell>", "exec"))?;
        exec_fn.call1((leading_code, namespace))?;

        if let Some(expr_node) = trailing_expr {
            let expr_code = compile.call1((expr_node, "<cell>", "eval"))?;
            let result = eval_fn.call1((expr_code, namespace))?;
            if !result.is_none() {
                if let Some(output) = converter::convert(py, &result) {
                    outputs.push(output);
                }
            }
        }
        Ok(())
    };

    if let Err(e) = run() {
        error = Some(format_runtime_error(py, &e));
    }

    let stdout = stdout_capture.restore_and_collect(py);
    let stderr = stderr_capture.restore_and_collect(py);

    if !stderr.is_empty() {
        error = Some(match error {
            Some(existing) if existing.is_empty() => stderr,
            Some(existing) => format!("{stderr}{existing}"),
            None => stderr,
        });
    }

    (stdout, outputs, error)
}

/// Splits a parsed module into `(leading_statements_module, trailing_expr)`
/// per §4.4 step 2: all nodes but the last, plus the last node's value if
/// it is a bare expression statement.
fn split_trailing_expression<'py>(
    ast: &Bound<'py, PyModule>,
    tree: &Bound<'py, PyAny>,
) -> PyResult<(Bound<'py, PyAny>, Option<Bound<'py, PyAny>>)> {
    let body = tree.getattr("body")?;
    let len: usize = body.call_method0("__len__")?.extract()?;

    let expr_class = ast.getattr("Expr")?;
    let (leading_items, trailing): (Vec<Bound<'py, PyAny>>, Option<Bound<'py, PyAny>>) = if len == 0 {
        (Vec::new(), None)
    } else {
        let last = body.get_item(len - 1)?;
        if last.is_instance(&expr_class)? {
            let mut items = Vec::with_capacity(len - 1);
            for i in 0..len - 1 {
                items.push(body.get_item(i)?);
            }
            (items, Some(last.getattr("value")?))
        } else {
            let mut items = Vec::with_capacity(len);
            for i in 0..len {
                items.push(body.get_item(i)?);
            }
            (items, None)
        }
    };

    let kwargs = PyDict::new(ast.py());
    kwargs.set_item("body", leading_items)?;
    kwargs.set_item("type_ignores", Vec::<Bound<'py, PyAny>>::new())?;
    let leading_module = ast.call_method("Module", (), Some(&kwargs))?;
    ast.call_method1("fix_missing_locations", (&leading_module,))?;

    let trailing_expr = match trailing {
        Some(value_node) => {
            let expr_kwargs = PyDict::new(ast.py());
            expr_kwargs.set_item("body", &value_node)?;
            let expr_module = ast.call_method("Expression", (), Some(&expr_kwargs))?;
            ast.call_method1("fix_missing_locations", (&expr_module,))?;
            Some(expr_module)
        }
        None => None,
    };

    Ok((leading_module, trailing_expr))
}

fn format_syntax_error(py: Python<'_>, err: &PyErr) -> String {
    format_traceback(py, err).unwrap_or_else(|| format!("SyntaxError: {err}"))
}

fn format_runtime_error(py: Python<'_>, err: &PyErr) -> String {
    format_traceback(py, err).unwrap_or_else(|| err.to_string())
}

fn format_traceback(py: Python<'_>, err: &PyErr) -> Option<String> {
    let traceback_mod = py.import("traceback").ok()?;
    let value = err.value(py);
    let tb = value.getattr("__traceback__").ok();
    let formatted = traceback_mod
        .call_method1(
            "format_exception",
            (value.get_type(), value, tb.unwrap_or_else(|| py.None().into_bound(py))),
        )
        .ok()?;
    let lines: Vec<String> = formatted.extract().ok()?;
    Some(lines.join(""))
}

/// Redirects `sys.<name>` to an in-memory `io.StringIO` for the duration of
/// a cell's execution, restoring the original stream on drop/collect.
struct StdCapture<'py> {
    sys: Bound<'py, PyAny>,
    attr: &'static str,
    original: Bound<'py, PyAny>,
    buffer: Bound<'py, PyAny>,
}

impl<'py> StdCapture<'py> {
    fn install(py: Python<'py>, attr: &'static str) -> Self {
        let sys = py.import("sys").expect("sys module always available");
        let original = sys.getattr(attr).expect("sys stream always present");
        let io = py.import("io").expect("io module always available");
        let buffer = io.call_method0("StringIO").expect("StringIO always constructible");
        sys.setattr(attr, &buffer).ok();
        Self {
            sys: sys.into_any(),
            attr,
            original,
            buffer,
        }
    }

    fn restore_and_collect(self, _py: Python<'py>) -> String {
        let text = self
            .buffer
            .call_method0("getvalue")
            .and_then(|v| v.extract::<String>())
            .unwrap_or_default();
        self.sys.setattr(self.attr, self.original).ok();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_expression_produces_output() {
        Python::with_gil(|py| {
            let namespace = PyDict::new(py);
            let (stdout, outputs, error) = execute_python(py, "2 + 2", &namespace);
            assert_eq!(stdout, "");
            assert!(error.is_none());
            assert_eq!(outputs.len(), 1);
        });
    }

    #[test]
    fn statement_only_has_no_outputs() {
        Python::with_gil(|py| {
            let namespace = PyDict::new(py);
            let (_, outputs, error) = execute_python(py, "x = 10", &namespace);
            assert!(error.is_none());
            assert!(outputs.is_empty());
            let x: i64 = namespace.get_item("x").unwrap().unwrap().extract().unwrap();
            assert_eq!(x, 10);
        });
    }

    #[test]
    fn exception_is_captured_not_raised() {
        Python::with_gil(|py| {
            let namespace = PyDict::new(py);
            let (_, _, error) = execute_python(py, "1 / 0", &namespace);
            assert!(error.unwrap().contains("ZeroDivisionError"));
        });
    }

    #[test]
    fn namespace_persists_across_calls() {
        Python::with_gil(|py| {
            let namespace = PyDict::new(py);
            execute_python(py, "x = 1", &namespace);
            let (_, outputs, error) = execute_python(py, "x + 1", &namespace);
            assert!(error.is_none());
            assert_eq!(outputs.len(), 1);
        });
    }

    #[test]
    fn stdout_is_captured() {
        Python::with_gil(|py| {
            let namespace = PyDict::new(py);
            let (stdout, _, error) = execute_python(py, "print('hi')", &namespace);
            assert!(error.is_none());
            assert_eq!(stdout, "hi\n");
        });
    }
}
