use std::path::Path;

use serde::Deserialize;

use crate::contact_line::RegionMap;
use crate::error::Result;
use crate::interface::InterfaceContour;
use crate::series::{FrameOutcome, SmoothedPoint, SpreadingSample, TimeSeries, WindowSummary};
use crate::structure::GridSnapshot;

fn opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Save every frame of a time series, gaps included, to CSV
pub fn save_series_to_csv(series: &TimeSeries, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;

    writer.write_record([
        "time",
        "status",
        "radius",
        "radius_left",
        "radius_right",
        "contact_left",
        "contact_right",
        "angle",
        "angle_left",
        "angle_right",
        "confidence_left",
        "confidence_right",
        "cap_angle",
        "area",
        "islands",
        "flux",
        "bulk_mass",
        "near_contact_line_mass",
        "precursor_film_mass",
    ])?;

    for record in series.records() {
        let mut row = vec![record.timestamp.to_string()];
        match &record.outcome {
            FrameOutcome::Analysed(result) => {
                row.extend([
                    "ok".to_string(),
                    result.radius().to_string(),
                    result.left.radius.to_string(),
                    result.right.radius.to_string(),
                    result.left.contact_x.to_string(),
                    result.right.contact_x.to_string(),
                    opt(result.mean_angle()),
                    opt(result.left.angle),
                    opt(result.right.angle),
                    result.left.confidence.to_string(),
                    result.right.confidence.to_string(),
                    opt(result.cap_angle),
                    result.area.to_string(),
                    result.islands.to_string(),
                    opt(result.regions.flux),
                    result.regions.bulk.mass.to_string(),
                    result.regions.near_contact_line.mass.to_string(),
                    result.regions.precursor_film.mass.to_string(),
                ]);
            }
            FrameOutcome::Failed { reason, .. } => {
                // Gaps keep their reason code and leave every value empty
                row.push(reason.code().to_string());
                row.extend(std::iter::repeat(String::new()).take(17));
            }
        }
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    time: f64,
    status: String,
    radius: Option<f64>,
    angle: Option<f64>,
}

/// Load the analysed frames of a series CSV written by `save_series_to_csv`
pub fn load_spreading_csv(csv_path: &Path) -> Result<Vec<SpreadingSample>> {
    let mut reader = csv::Reader::from_path(csv_path)?;

    let mut samples = Vec::new();
    for result in reader.deserialize() {
        let row: SeriesRow = result?;
        if let ("ok", Some(radius)) = (row.status.as_str(), row.radius) {
            samples.push(SpreadingSample {
                time: row.time,
                radius,
                angle: row.angle,
            });
        }
    }

    Ok(samples)
}

/// Save running averages to CSV
pub fn save_smoothed_to_csv(smoothed: &[SmoothedPoint], output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(["time", "radius_smooth", "angle_smooth"])?;

    for point in smoothed {
        writer.write_record(&[
            point.timestamp.to_string(),
            point.radius.to_string(),
            opt(point.angle),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Save window means to CSV
pub fn save_summary_to_csv(summary: &[WindowSummary], output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(["time", "analysed", "failed", "radius_mean", "angle_mean"])?;

    for window in summary {
        writer.write_record(&[
            window.timestamp.to_string(),
            window.analysed.to_string(),
            window.failed.to_string(),
            opt(window.radius),
            opt(window.angle),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Save both interface branches, from the substrate up, to CSV
pub fn save_contour_to_csv(contour: &InterfaceContour, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(["branch", "x", "z"])?;

    for branch in [&contour.left, &contour.right] {
        for point in &branch.points {
            writer.write_record(&[
                branch.side.name().to_string(),
                point.x.to_string(),
                point.z.to_string(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Save the region label of every bin to CSV
pub fn save_regions_to_csv(snapshot: &GridSnapshot, map: &RegionMap, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(["x", "z", "mass", "vx", "vz", "label"])?;

    for (bin, label) in snapshot.bins().iter().zip(map.labels()) {
        writer.write_record(&[
            bin.x.to_string(),
            bin.z.to_string(),
            bin.mass.to_string(),
            bin.vx.to_string(),
            bin.vz.to_string(),
            label.name().to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::series::tests::analysed;
    use crate::series::TimeSeriesAggregator;
    use std::fs;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("output_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_series_csv_reloads_analysed_frames() {
        let mut aggregator = TimeSeriesAggregator::new();
        aggregator.append(0.0, FrameOutcome::failed(&AnalysisError::EmptyDroplet)).unwrap();
        aggregator.append(1.0, analysed(2.0, Some(80.0))).unwrap();
        aggregator.append(2.0, analysed(3.0, None)).unwrap();
        let series = aggregator.finalize().unwrap();

        let path = temp_path("series.csv");
        save_series_to_csv(&series, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("0,empty_droplet,"));
        let columns = lines[0].split(',').count();
        assert!(lines.iter().all(|l| l.split(',').count() == columns));

        let samples = load_spreading_csv(&path).unwrap();
        assert_eq!(
            samples,
            vec![
                SpreadingSample { time: 1.0, radius: 2.0, angle: Some(80.0) },
                SpreadingSample { time: 2.0, radius: 3.0, angle: None },
            ]
        );

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_smoothed_and_summary_csv() {
        let path = temp_path("smoothed.csv");
        let smoothed = [SmoothedPoint { timestamp: 1.0, radius: 2.5, angle: None }];
        save_smoothed_to_csv(&smoothed, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "time,radius_smooth,angle_smooth\n1,2.5,\n");
        fs::remove_file(&path).unwrap();

        let path = temp_path("summary.csv");
        let summary = [WindowSummary {
            timestamp: 0.0,
            analysed: 2,
            failed: 1,
            radius: Some(1.5),
            angle: Some(90.0),
        }];
        save_summary_to_csv(&summary, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().nth(1), Some("0,2,1,1.5,90"));
        fs::remove_file(&path).unwrap();
    }
}
