use anyhow::{Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use sdts_topo::{DuplicatePolicy, LayerType, ReaderConfig, Transfer, ZipHandler};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 入力XMLファイル、ZIPファイル、またはディレクトリ
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// ポリゴンのダンプを書き出すディレクトリ（省略時はログのみ）
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long)]
    threads: Option<usize>,

    /// これ以上のレコードIDを不正として読み捨てる
    #[arg(long, default_value_t = ReaderConfig::DEFAULT_MAX_RECORD_ID)]
    max_record_id: i32,

    /// 重複レコードIDをエラーとして扱う
    #[arg(long)]
    strict_duplicates: bool,

    /// 対象のポリゴンモジュール（省略時はすべて）
    #[arg(long, value_name = "MODULE")]
    polygon_module: Option<String>,
}

impl Args {
    fn reader_config(&self) -> ReaderConfig {
        let duplicates = if self.strict_duplicates {
            DuplicatePolicy::Fail
        } else {
            DuplicatePolicy::Skip
        };
        ReaderConfig::new()
            .with_max_record_id(self.max_record_id)
            .with_duplicates(duplicates)
    }
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    // 出力ディレクトリの作成
    if let Some(output) = &args.output {
        fs::create_dir_all(output)
            .with_context(|| format!("Failed to create output directory: {:?}", output))?;
    }

    let outputs = OutputPaths::default();

    let summary = if args.input.is_file() {
        match input_type(&args.input) {
            Some(InputType::Zip) => {
                info!("Processing ZIP file: {:?}", args.input);
                process_zip_file(&args.input, &args, &outputs)?
            }
            Some(InputType::Xml) => {
                info!("Processing XML file: {:?}", args.input);
                process_file(&args.input, &args, &outputs)?
            }
            None => {
                error!("Unsupported file type: {:?}", args.input);
                anyhow::bail!("Input file must be .xml or .zip");
            }
        }
    } else if args.input.is_dir() {
        info!("Processing directory: {:?}", args.input);
        process_directory(&args.input, &args, &outputs)?
    } else {
        error!("Invalid input path: {:?}", args.input);
        anyhow::bail!("Input path must be a file or directory");
    };

    info!(
        "Assembled {} polygons ({} with unclosed rings) in {:?}",
        summary.polygons,
        summary.unclosed,
        start_time.elapsed()
    );

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputType {
    Xml,
    Zip,
}

fn input_type(path: &Path) -> Option<InputType> {
    let ext = path.extension().and_then(|s| s.to_str())?;
    if ext.eq_ignore_ascii_case("xml") {
        Some(InputType::Xml)
    } else if ext.eq_ignore_ascii_case("zip") {
        Some(InputType::Zip)
    } else {
        None
    }
}

/// 入力単位の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct AssemblySummary {
    polygons: usize,
    unclosed: usize,
}

impl AssemblySummary {
    fn add(&mut self, other: AssemblySummary) {
        self.polygons += other.polygons;
        self.unclosed += other.unclosed;
    }
}

/// この実行で書き出したダンプのパス。同名トランスファー同士の上書きを防ぐ。
#[derive(Debug, Default)]
struct OutputPaths {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl OutputPaths {
    /// `<transfer>_<module>.txt` を予約する。使用済みなら `_2`, `_3`, ... を付ける
    fn claim(&self, dir: &Path, transfer: &str, module: &str) -> Result<PathBuf> {
        let mut claimed = self
            .claimed
            .lock()
            .map_err(|_| anyhow::anyhow!("Output path registry is poisoned"))?;

        let stem = output_file_stem(transfer, module);
        let mut path = dir.join(format!("{}.txt", stem));
        let mut suffix = 2;
        while claimed.contains(&path) {
            path = dir.join(format!("{}_{}.txt", stem, suffix));
            suffix += 1;
        }
        if suffix > 2 {
            warn!(
                "Output {}.txt is already written by another transfer, using {:?}",
                stem, path
            );
        }

        claimed.insert(path.clone());
        Ok(path)
    }
}

fn process_file(path: &Path, args: &Args, outputs: &OutputPaths) -> Result<AssemblySummary> {
    let transfer =
        Transfer::open(path).with_context(|| format!("Failed to read transfer: {:?}", path))?;
    process_transfer(&transfer, args, outputs)
}

fn process_zip_file(path: &Path, args: &Args, outputs: &OutputPaths) -> Result<AssemblySummary> {
    let handler = ZipHandler::new(path);
    let transfers = handler.transfers()?;
    info!("Processing {} transfers from {:?}", transfers.len(), path);

    let mut summary = AssemblySummary::default();
    for transfer in &transfers {
        summary.add(process_transfer(transfer, args, outputs)?);
    }

    Ok(summary)
}

fn process_directory(dir: &Path, args: &Args, outputs: &OutputPaths) -> Result<AssemblySummary> {
    use rayon::prelude::*;

    // XML/ZIPファイルを再帰的に収集
    let input_files = collect_input_files(dir)?;
    info!("Found {} input files (XML/ZIP)", input_files.len());

    // トランスファーごとに独立して並列処理
    let results: Vec<Result<AssemblySummary>> = input_files
        .par_iter()
        .map(|(path, input_type)| match input_type {
            InputType::Xml => process_file(path, args, outputs),
            InputType::Zip => process_zip_file(path, args, outputs),
        })
        .collect();

    // 失敗したファイルと閉じないポリゴンを含むファイルを報告
    let mut total = AssemblySummary::default();
    let mut errors = Vec::new();
    for ((path, _), result) in input_files.iter().zip(results) {
        match result {
            Ok(summary) => {
                if summary.unclosed > 0 {
                    warn!(
                        "{}: {} of {} polygons have unclosed rings",
                        path.display(),
                        summary.unclosed,
                        summary.polygons
                    );
                }
                total.add(summary);
            }
            Err(e) => errors.push(format!("{}: {:#}", path.display(), e)),
        }
    }

    if !errors.is_empty() {
        error!("Failed to process {} files:", errors.len());
        for err in &errors {
            error!("  {}", err);
        }
        anyhow::bail!("{} files failed to process", errors.len());
    }

    Ok(total)
}

fn collect_input_files(dir: &Path) -> Result<Vec<(PathBuf, InputType)>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read directory: {:?}", dir))? {
        let path = entry?.path();

        if path.is_dir() {
            // サブディレクトリを再帰的に探索
            files.extend(collect_input_files(&path)?);
        } else if let Some(input_type) = input_type(&path) {
            files.push((path, input_type));
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn process_transfer(
    transfer: &Transfer,
    args: &Args,
    outputs: &OutputPaths,
) -> Result<AssemblySummary> {
    let config = args.reader_config();

    let modules: Vec<String> = match &args.polygon_module {
        Some(module) => vec![module.clone()],
        None => transfer
            .modules_of_type(LayerType::Polygon)
            .into_iter()
            .map(str::to_string)
            .collect(),
    };

    let mut summary = AssemblySummary::default();
    if modules.is_empty() {
        warn!("Transfer '{}' has no polygon modules", transfer.name());
        return Ok(summary);
    }

    for module in &modules {
        let polygons = transfer
            .assemble_polygons(module, &config)
            .with_context(|| {
                format!(
                    "Failed to assemble polygons of {} in '{}'",
                    module,
                    transfer.name()
                )
            })?;
        let report = polygons.report();

        info!(
            "{}/{}: {} polygons ({} closed, {} unclosed, {} empty)",
            transfer.name(),
            module,
            report.polygons,
            report.assembled,
            report.unclosed.len(),
            report.empty.len()
        );
        summary.add(AssemblySummary {
            polygons: report.polygons,
            unclosed: report.unclosed.len(),
        });

        if let Some(output) = &args.output {
            let output_path = outputs.claim(output, transfer.name(), module)?;
            let dump: String = polygons.polygons().map(|p| p.to_string()).collect();
            fs::write(&output_path, dump)
                .with_context(|| format!("Failed to write {:?}", output_path))?;
            info!("Written polygon dump: {:?}", output_path);
        }
    }

    Ok(summary)
}

fn output_file_stem(transfer: &str, module: &str) -> String {
    let transfer = if transfer.is_empty() {
        "transfer"
    } else {
        transfer
    };
    format!("{}_{}", transfer, module)
}
