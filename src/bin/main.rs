use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use wetting_analysis_rs::{
    find_datamap_files, fit_power_law, load_spreading_csv, read_frames, save_contour_to_csv,
    save_regions_to_csv, save_series_to_csv, save_smoothed_to_csv, save_summary_to_csv,
    smooth_samples, BandWidths, Connectivity, CsvDatamap, ExtractParams, FitModel, FitParams,
    FramePipeline, PipelineConfig, Recenter, RegionLabel, SnapshotSource,
};

/// Command-line tool for analysing droplet wetting from binned flow data
#[derive(Parser)]
#[command(name = "droplet-analysis")]
#[command(about = "Measure droplet spreading, contact angles and contact line flow from data maps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Model {
    /// Least-squares polynomial, see --fit-order
    Polynomial,
    /// Least-squares circular arc
    Arc,
}

#[derive(Clone, Copy, ValueEnum)]
enum Origin {
    /// Midpoint between the contact points
    Zero,
    /// Centre of mass of the droplet
    Com,
}

#[derive(Clone, Copy, ValueEnum)]
enum Neighbourhood {
    C4,
    C8,
}

/// Interface extraction parameters
#[derive(Args)]
struct ExtractArgs {
    /// Bins with at least this mass are liquid
    #[arg(long, default_value_t = 0.5)]
    density_threshold: f64,

    /// Width in columns of the interface height smoothing window (1 disables it)
    #[arg(long, default_value_t = 1)]
    smoothing_window: usize,

    /// Neighbourhood used to group liquid bins into droplets
    #[arg(long, value_enum, default_value_t = Neighbourhood::C8)]
    connectivity: Neighbourhood,

    /// Drop liquid bins with fewer liquid neighbours than --neighbour-count within this radius
    #[arg(long)]
    neighbour_radius: Option<f64>,

    /// Number of liquid neighbours required by --neighbour-radius
    #[arg(long, default_value_t = 1)]
    neighbour_count: usize,

    /// Substrate height (default: lowest liquid row of the droplet)
    #[arg(long)]
    floor: Option<f64>,

    /// Treat a droplet broken into several islands as a failed frame
    #[arg(long)]
    single_droplet: bool,
}

/// Contact angle fit parameters
#[derive(Args)]
struct FitArgs {
    /// Number of interface points, from the substrate up, used in the fit
    #[arg(long, default_value_t = 5)]
    fit_window: usize,

    #[arg(long, value_enum, default_value_t = Model::Polynomial)]
    model: Model,

    /// Polynomial order (1 to 3)
    #[arg(long, default_value_t = 1)]
    fit_order: usize,

    /// Tangents within this many degrees of horizontal leave the angle undefined
    #[arg(long, default_value_t = 1.0)]
    degenerate_tolerance: f64,
}

/// Contact line region parameters
#[derive(Args)]
struct BandArgs {
    /// Bins closer than this to a contact point are near the contact line
    #[arg(long, default_value_t = 2.0)]
    inner_band: f64,

    /// Precursor film bins lie closer than this to a contact point
    #[arg(long, default_value_t = 6.0)]
    outer_band: f64,

    /// Precursor film bins lie lower than this above the substrate
    #[arg(long, default_value_t = 2.0)]
    film_height: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure radius and contact angles over numbered data maps
    Spreading {
        /// Data map file name base, files are read as <base>00001<ext>, <base>00002<ext>, ...
        #[arg(short, long)]
        base: String,

        /// First data map number
        #[arg(long, default_value_t = 1)]
        begin: usize,

        /// Last data map number (default: until the first missing file)
        #[arg(long)]
        end: Option<usize>,

        #[arg(long, default_value = ".csv")]
        ext: String,

        /// Time between data maps
        #[arg(long, default_value_t = 1.0)]
        dt: f64,

        /// Time of the first data map
        #[arg(long, default_value_t = 0.0)]
        t0: f64,

        /// Also write means over windows of this many frames
        #[arg(long)]
        summary_window: Option<usize>,

        #[command(flatten)]
        extract: ExtractArgs,

        #[command(flatten)]
        fit: FitArgs,

        #[command(flatten)]
        bands: BandArgs,

        /// Output CSV path (default: <base>spreading.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract the droplet interface of a single data map
    Interface {
        /// Path to the data map
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        extract: ExtractArgs,

        #[command(flatten)]
        fit: FitArgs,

        #[command(flatten)]
        bands: BandArgs,

        /// Shift the saved interface horizontally so this origin lies at x = 0
        #[arg(long, value_enum)]
        recenter: Option<Origin>,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Label the bins of a single data map by contact line region
    ContactLine {
        /// Path to the data map
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        extract: ExtractArgs,

        #[command(flatten)]
        fit: FitArgs,

        #[command(flatten)]
        bands: BandArgs,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Smooth spreading data by calculating running averages
    Smooth {
        /// Path to the spreading CSV (from spreading command)
        #[arg(short, long)]
        input: PathBuf,

        /// Window size for running average
        #[arg(short, long, default_value_t = 5)]
        window_size: usize,

        /// Output CSV path (default: auto-generated from input path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit a power law r = a t^k to spreading data
    Fit {
        /// Path to the spreading CSV (from spreading command)
        #[arg(short, long)]
        input: PathBuf,

        /// Earliest time after impact to include
        #[arg(long)]
        t_min: Option<f64>,

        /// Latest time after impact to include
        #[arg(long)]
        t_max: Option<f64>,
    },
}

fn pipeline_config(extract: &ExtractArgs, fit: &FitArgs, bands: &BandArgs) -> PipelineConfig {
    let connectivity = match extract.connectivity {
        Neighbourhood::C4 => Connectivity::C4,
        Neighbourhood::C8 => Connectivity::C8,
    };
    let mut params = ExtractParams::new(extract.density_threshold, extract.smoothing_window)
        .with_connectivity(connectivity)
        .single_droplet(extract.single_droplet);
    if let Some(radius) = extract.neighbour_radius {
        params = params.with_neighbour_filter(radius, extract.neighbour_count);
    }
    if let Some(floor) = extract.floor {
        params = params.with_floor(floor);
    }

    let model = match fit.model {
        Model::Polynomial => FitModel::Polynomial {
            order: fit.fit_order,
        },
        Model::Arc => FitModel::CircularArc,
    };

    PipelineConfig::new(
        params,
        FitParams::new(fit.fit_window, model, fit.degenerate_tolerance),
        BandWidths::new(bands.inner_band, bands.outer_band, bands.film_height),
    )
}

fn exit_with(context: &str, e: impl Display) -> ! {
    eprintln!("❌ {}: {}", context, e);
    std::process::exit(1);
}

fn auto_path(input: &Path, suffix: &str) -> PathBuf {
    let base = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("datamap");
    let dir = input.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}{}", base, suffix))
}

fn format_angle(angle: Option<f64>) -> String {
    angle.map_or_else(|| "undefined".to_string(), |a| format!("{:.2}°", a))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Spreading {
            base,
            begin,
            end,
            ext,
            dt,
            t0,
            summary_window,
            extract,
            fit,
            bands,
            output,
        } => {
            println!("Reading data maps: {}{{n:05}}{}", base, ext);

            let pipeline = FramePipeline::new(pipeline_config(&extract, &fit, &bands))
                .unwrap_or_else(|e| exit_with("Invalid parameters", e))
                .with_progress(true);

            let files = find_datamap_files(&base, begin, end, &ext);
            if files.is_empty() {
                exit_with("No data maps found", format!("{}{:05}{}", base, begin, ext));
            }
            println!("✅ Found {} data maps", files.len());

            let frames = read_frames(&CsvDatamap::new(), &files, t0, dt)
                .unwrap_or_else(|e| exit_with("Error reading data maps", e));

            let series = pipeline
                .run(&frames)
                .unwrap_or_else(|e| exit_with("Error analysing frames", e));
            println!(
                "✅ Analysed {} frames ({} gaps)",
                series.len(),
                series.gaps()
            );
            if let Some(impact) = series.impact_time() {
                println!("Impact at t = {}", impact);
            }

            let output_path = output.unwrap_or_else(|| PathBuf::from(format!("{}spreading.csv", base)));
            if let Err(e) = save_series_to_csv(&series, &output_path) {
                exit_with("Error saving results", e);
            }
            println!("📄 Results saved to: {:?}", output_path);

            if let Some(window_size) = summary_window {
                let summary = series
                    .summarize(window_size)
                    .unwrap_or_else(|e| exit_with("Error summarizing frames", e));
                let summary_path = auto_path(&output_path, "_summary.csv");
                if let Err(e) = save_summary_to_csv(&summary, &summary_path) {
                    exit_with("Error saving summary", e);
                }
                println!("📄 Summary of {} windows saved to: {:?}", summary.len(), summary_path);
            }
        }

        Commands::Interface {
            input,
            extract,
            fit,
            bands,
            recenter,
            output,
        } => {
            println!("Extracting interface: {:?}", input);

            let pipeline = FramePipeline::new(pipeline_config(&extract, &fit, &bands))
                .unwrap_or_else(|e| exit_with("Invalid parameters", e));
            let snapshot = CsvDatamap::new()
                .read_snapshot(&input, 0.0)
                .unwrap_or_else(|e| exit_with("Error reading data map", e));
            let analysis = pipeline
                .analyse_detailed(&snapshot)
                .unwrap_or_else(|e| exit_with("Error extracting interface", e));

            let result = &analysis.result;
            println!("✅ Found {} droplet(s)", result.islands);
            println!("Radius: {:.3}", result.radius());
            println!(
                "Contact angles: left {}, right {}",
                format_angle(result.left.angle),
                format_angle(result.right.angle)
            );
            println!("Cap angle: {}", format_angle(result.cap_angle));
            println!("Area: {:.3}", result.area);
            println!("Interface length: {:.3}", analysis.contour().length());

            let contour = match recenter {
                Some(Origin::Zero) => analysis.contour().recentered(Recenter::Zero),
                Some(Origin::Com) => analysis.contour().recentered(Recenter::CenterOfMass),
                None => analysis.contour().clone(),
            };

            let output_path = output.unwrap_or_else(|| auto_path(&input, "_interface.csv"));
            if let Err(e) = save_contour_to_csv(&contour, &output_path) {
                exit_with("Error saving interface", e);
            }
            println!("📄 Interface saved to: {:?}", output_path);
        }

        Commands::ContactLine {
            input,
            extract,
            fit,
            bands,
            output,
        } => {
            println!("Classifying contact line regions: {:?}", input);

            let pipeline = FramePipeline::new(pipeline_config(&extract, &fit, &bands))
                .unwrap_or_else(|e| exit_with("Invalid parameters", e));
            let snapshot = CsvDatamap::new()
                .read_snapshot(&input, 0.0)
                .unwrap_or_else(|e| exit_with("Error reading data map", e));
            let analysis = pipeline
                .analyse_detailed(&snapshot)
                .unwrap_or_else(|e| exit_with("Error analysing data map", e));

            let regions = &analysis.result.regions;
            for label in RegionLabel::ALL {
                let stats = regions.stats(label);
                println!(
                    "{:>18}: {} bins, mass {:.3}",
                    label.name(),
                    stats.bins,
                    stats.mass
                );
            }
            match regions.flux {
                Some(flux) => println!("Contact line flux: {:.4}", flux),
                None => println!("Contact line flux: undefined"),
            }

            let output_path = output.unwrap_or_else(|| auto_path(&input, "_regions.csv"));
            if let Err(e) = save_regions_to_csv(&snapshot, &analysis.regions, &output_path) {
                exit_with("Error saving regions", e);
            }
            println!("📄 Regions saved to: {:?}", output_path);
        }

        Commands::Smooth {
            input,
            window_size,
            output,
        } => {
            println!("Smoothing spreading data: {:?}", input);
            println!("Window size: {}", window_size);

            let samples = load_spreading_csv(&input)
                .unwrap_or_else(|e| exit_with("Error loading CSV", e));
            println!("✅ Loaded {} frames from CSV", samples.len());

            let smoothed = smooth_samples(&samples, window_size)
                .unwrap_or_else(|e| exit_with("Error smoothing data", e));

            let output_path =
                output.unwrap_or_else(|| auto_path(&input, &format!("_{}_smoothed.csv", window_size)));
            if let Err(e) = save_smoothed_to_csv(&smoothed, &output_path) {
                exit_with("Error saving smoothed data", e);
            }
            println!("✅ Successfully smoothed {} frames", smoothed.len());
            println!("📄 Smoothed data saved to: {:?}", output_path);
        }

        Commands::Fit {
            input,
            t_min,
            t_max,
        } => {
            println!("Fitting spreading data: {:?}", input);

            let samples = load_spreading_csv(&input)
                .unwrap_or_else(|e| exit_with("Error loading CSV", e));
            let fit = fit_power_law(&samples, (t_min, t_max))
                .unwrap_or_else(|e| exit_with("Error fitting power law", e));

            info!("fit used {} of {} frames", fit.points, samples.len());
            println!("✅ r = a t^k with a = {:.4}, k = {:.4}", fit.prefactor, fit.exponent);
        }
    }
}
