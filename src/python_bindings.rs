use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use std::path::{Path, PathBuf};

use crate::config::{BandWidths, ExtractParams, FitModel, FitParams, PipelineConfig};
use crate::datamap::{find_datamap_files, read_frames, CsvDatamap, SnapshotSource};
use crate::error::AnalysisError;
use crate::interface::{InterfaceExtractor, Recenter};
use crate::output::{load_spreading_csv, save_series_to_csv, save_smoothed_to_csv};
use crate::pipeline::FramePipeline;
use crate::series::{fit_power_law, smooth_samples, FrameOutcome};

fn to_py_err(e: AnalysisError) -> PyErr {
    let message = e.to_string();
    match e {
        AnalysisError::Io(_) => PyErr::new::<pyo3::exceptions::PyIOError, _>(message),
        AnalysisError::InvalidParameter { .. } => PyErr::new::<pyo3::exceptions::PyValueError, _>(message),
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(message),
    }
}

fn fit_model(model: &str, order: usize) -> PyResult<FitModel> {
    match model {
        "polynomial" => Ok(FitModel::Polynomial { order }),
        "arc" => Ok(FitModel::CircularArc),
        other => Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
            "unknown fit model '{}', expected 'polynomial' or 'arc'",
            other
        ))),
    }
}

fn recenter_origin(origin: &str) -> PyResult<Recenter> {
    match origin {
        "zero" => Ok(Recenter::Zero),
        "com" => Ok(Recenter::CenterOfMass),
        other => Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
            "unknown recenter origin '{}', expected 'zero' or 'com'",
            other
        ))),
    }
}

/// Python binding for the spreading analysis over numbered data maps
#[pyfunction]
#[pyo3(signature = (
    base,
    begin=1,
    end=None,
    ext=".csv",
    dt=1.0,
    density_threshold=0.5,
    smoothing_window=1,
    fit_window=5,
    model="polynomial",
    fit_order=1,
    inner_band=2.0,
    outer_band=6.0,
    film_height=2.0,
    output_csv=None
))]
#[allow(clippy::too_many_arguments)]
fn spreading(
    py: Python<'_>,
    base: &str,
    begin: usize,
    end: Option<usize>,
    ext: &str,
    dt: f64,
    density_threshold: f64,
    smoothing_window: usize,
    fit_window: usize,
    model: &str,
    fit_order: usize,
    inner_band: f64,
    outer_band: f64,
    film_height: f64,
    output_csv: Option<&str>,
) -> PyResult<PyObject> {
    let config = PipelineConfig::new(
        ExtractParams::new(density_threshold, smoothing_window),
        FitParams::new(fit_window, fit_model(model, fit_order)?, 1.0),
        BandWidths::new(inner_band, outer_band, film_height),
    );
    let pipeline = FramePipeline::new(config).map_err(to_py_err)?;

    let files = find_datamap_files(base, begin, end, ext);
    let frames = read_frames(&CsvDatamap::new(), &files, 0.0, dt).map_err(to_py_err)?;
    let series = pipeline.run(&frames).map_err(to_py_err)?;

    if let Some(path) = output_csv {
        save_series_to_csv(&series, Path::new(path)).map_err(to_py_err)?;
    }

    // Convert records to Python list of dicts
    let py_results = PyList::empty_bound(py);
    for record in series.records() {
        let py_dict = PyDict::new_bound(py);
        py_dict.set_item("time", record.timestamp)?;
        match &record.outcome {
            FrameOutcome::Analysed(result) => {
                py_dict.set_item("status", "ok")?;
                py_dict.set_item("radius", result.radius())?;
                py_dict.set_item("angle_left", result.left.angle)?;
                py_dict.set_item("angle_right", result.right.angle)?;
                py_dict.set_item("cap_angle", result.cap_angle)?;
                py_dict.set_item("area", result.area)?;
                py_dict.set_item("islands", result.islands)?;
                py_dict.set_item("flux", result.regions.flux)?;
            }
            FrameOutcome::Failed { reason, message } => {
                py_dict.set_item("status", reason.code())?;
                py_dict.set_item("message", message)?;
            }
        }
        py_results.append(py_dict)?;
    }

    Ok(py_results.into())
}

/// Python binding for the interface of a single data map
#[pyfunction]
#[pyo3(signature = (datamap, density_threshold=0.5, smoothing_window=1, recenter=None))]
fn extract_interface(
    py: Python<'_>,
    datamap: &str,
    density_threshold: f64,
    smoothing_window: usize,
    recenter: Option<&str>,
) -> PyResult<PyObject> {
    let snapshot = CsvDatamap::new()
        .read_snapshot(&PathBuf::from(datamap), 0.0)
        .map_err(to_py_err)?;
    let extractor = InterfaceExtractor::new(ExtractParams::new(
        density_threshold,
        smoothing_window,
    ))
    .map_err(to_py_err)?;
    let contours = extractor.extract(&snapshot).map_err(to_py_err)?;
    let contour = match recenter {
        Some(origin) => contours.primary().recentered(recenter_origin(origin)?),
        None => contours.primary().clone(),
    };

    let py_dict = PyDict::new_bound(py);
    for branch in [&contour.left, &contour.right] {
        let points: Vec<(f64, f64)> = branch.points.iter().map(|p| (p.x, p.z)).collect();
        py_dict.set_item(branch.side.name(), points)?;
    }
    py_dict.set_item("substrate", contour.substrate)?;
    py_dict.set_item("area", contour.area())?;
    py_dict.set_item("length", contour.length())?;
    py_dict.set_item("islands", contours.island_count())?;

    Ok(py_dict.into())
}

/// Python binding for smoothing a spreading CSV
#[pyfunction]
#[pyo3(signature = (input_csv, window_size=5, output_csv=None))]
fn smooth(
    py: Python<'_>,
    input_csv: &str,
    window_size: usize,
    output_csv: Option<&str>,
) -> PyResult<PyObject> {
    let samples = load_spreading_csv(Path::new(input_csv)).map_err(to_py_err)?;
    let smoothed = smooth_samples(&samples, window_size).map_err(to_py_err)?;

    if let Some(path) = output_csv {
        save_smoothed_to_csv(&smoothed, Path::new(path)).map_err(to_py_err)?;
    }

    let py_smoothed = PyList::empty_bound(py);
    for point in smoothed {
        let py_dict = PyDict::new_bound(py);
        py_dict.set_item("time", point.timestamp)?;
        py_dict.set_item("radius_smooth", point.radius)?;
        py_dict.set_item("angle_smooth", point.angle)?;
        py_smoothed.append(py_dict)?;
    }

    Ok(py_smoothed.into())
}

/// Python binding for the power law fit of a spreading CSV, returns (a, k)
#[pyfunction]
#[pyo3(signature = (input_csv, t_min=None, t_max=None))]
fn fit(input_csv: &str, t_min: Option<f64>, t_max: Option<f64>) -> PyResult<(f64, f64)> {
    let samples = load_spreading_csv(Path::new(input_csv)).map_err(to_py_err)?;
    let fit = fit_power_law(&samples, (t_min, t_max)).map_err(to_py_err)?;
    Ok((fit.prefactor, fit.exponent))
}

/// Python module definition
#[pymodule]
fn wetting_analysis_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(spreading, m)?)?;
    m.add_function(wrap_pyfunction!(extract_interface, m)?)?;
    m.add_function(wrap_pyfunction!(smooth, m)?)?;
    m.add_function(wrap_pyfunction!(fit, m)?)?;
    m.add("__doc__", "Droplet wetting analysis Rust library with Python bindings")?;
    Ok(())
}
