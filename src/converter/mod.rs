//! MIME Converter (L3, §4.3). Converts a single Python value into a typed
//! output bundle. Recognition rules apply in order; first match wins.
//! Conversion failures degrade to text with a short diagnostic rather than
//! raising into the executor.

use crate::cell::Output;
use pyo3::prelude::*;
use pyo3::types::{PyAny, PyDict};
use serde_json::Value;

/// `value` must be `None`-filtered by the caller before invoking this (the
/// executor skips conversion entirely when the trailing expression evaluates
/// to Python's `None`).
pub fn convert(py: Python<'_>, value: &Bound<'_, PyAny>) -> Option<Output> {
    if let Some(output) = try_matplotlib(py, value) {
        return Some(output);
    }
    if let Some(output) = try_plotly(value) {
        return Some(output);
    }
    if let Some(output) = try_vegalite(value) {
        return Some(output);
    }
    if let Some(output) = try_dataframe(value) {
        return Some(output);
    }
    Some(try_text(value))
}

fn try_matplotlib(py: Python<'_>, value: &Bound<'_, PyAny>) -> Option<Output> {
    let module = py.import("matplotlib.figure").ok()?;
    let figure_class = module.getattr("Figure").ok()?;
    if !value.is_instance(&figure_class).unwrap_or(false) {
        return None;
    }
    let io = py.import("io").ok()?;
    let buf = io.call_method0("BytesIO").ok()?;
    let kwargs = PyDict::new(py);
    kwargs.set_item("format", "png").ok()?;
    kwargs.set_item("bbox_inches", "tight").ok()?;
    let save_result = value.call_method("savefig", (&buf,), Some(&kwargs));
    if save_result.is_err() {
        return Some(degrade_to_text(value, "matplotlib savefig failed"));
    }
    let raw: Vec<u8> = buf.call_method0("getvalue").ok()?.extract().ok()?;
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
    Some(Output::text("image/png", encoded))
}

fn try_plotly(value: &Bound<'_, PyAny>) -> Option<Output> {
    let type_name = value.get_type().name().ok()?;
    if !type_name.to_string().contains("Figure") || !module_path_contains(value, "plotly") {
        return None;
    }
    let json_str: String = value.call_method0("to_json").ok()?.extract().ok()?;
    match serde_json::from_str::<Value>(&json_str) {
        Ok(v) => Some(Output::structured("application/vnd.plotly.v1+json", v)),
        Err(_) => Some(degrade_to_text(value, "plotly to_json produced invalid JSON")),
    }
}

fn try_vegalite(value: &Bound<'_, PyAny>) -> Option<Output> {
    if !module_path_contains(value, "altair") {
        return None;
    }
    let dict = value.call_method0("to_dict").ok()?;
    let json_str: String = dict
        .py()
        .import("json")
        .ok()?
        .call_method1("dumps", (dict,))
        .ok()?
        .extract()
        .ok()?;
    match serde_json::from_str::<Value>(&json_str) {
        Ok(v) => Some(Output::structured("application/vnd.vegalite.v5+json", v)),
        Err(_) => Some(degrade_to_text(value, "altair to_dict produced invalid JSON")),
    }
}

fn try_dataframe(value: &Bound<'_, PyAny>) -> Option<Output> {
    if !module_path_contains(value, "pandas") {
        return None;
    }
    let type_name = value.get_type().name().ok()?;
    if type_name.to_string() != "DataFrame" {
        return None;
    }
    let columns: Vec<String> = value
        .getattr("columns")
        .ok()?
        .call_method0("tolist")
        .ok()?
        .extract()
        .ok()?;
    let rows_any = value.call_method0("values").ok()?;
    let rows_list = rows_any.call_method0("tolist").ok()?;
    let rows: Vec<Vec<Value>> = match python_to_json(&rows_list) {
        Ok(Value::Array(outer)) => outer
            .into_iter()
            .map(|row| match row {
                Value::Array(cells) => cells,
                other => vec![other],
            })
            .collect(),
        _ => return Some(degrade_to_text(value, "DataFrame values were not JSON-serializable")),
    };
    Some(Output::structured(
        "application/json",
        serde_json::json!({ "type": "table", "columns": columns, "rows": rows }),
    ))
}

fn try_text(value: &Bound<'_, PyAny>) -> Output {
    let text = value
        .str()
        .map(|s| s.to_string())
        .unwrap_or_else(|_| "<unrepresentable value>".to_string());
    Output::plain_text(text)
}

fn degrade_to_text(value: &Bound<'_, PyAny>, reason: &str) -> Output {
    let mut output = try_text(value);
    output
        .metadata
        .insert("conversion_error".to_string(), Value::String(reason.to_string()));
    output
}

fn module_path_contains(value: &Bound<'_, PyAny>, needle: &str) -> bool {
    value
        .get_type()
        .getattr("__module__")
        .ok()
        .and_then(|m| m.extract::<String>().ok())
        .map(|m| m.contains(needle))
        .unwrap_or(false)
}

fn python_to_json(value: &Bound<'_, PyAny>) -> PyResult<Value> {
    pythonize::depythonize(value).map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))
}
