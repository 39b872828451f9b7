use std::str::FromStr;

use clap::{Arg, Command};
use swarmsim::logging::{LogConfig, LogOutput, init_logging, level_for_verbosity, parse_log_level};
use swarmsim::scenario::ScenarioConfig;
use swarmsim::simulation::SimulationEngine;

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("swarmsim")
        .version("0.1.0")
        .about("ドローン群制御シミュレーション (Swarm Simulation)")
        .long_about("ドローン群の編隊・護衛・射撃・追従・障害物周回ミッションを\n\
                     固定時間刻みでシミュレーションします。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help("実行するシナリオファイル(.yaml)のパスを指定します。\n\
                           指定しない場合、利用可能なシナリオ一覧を表示します。")
                .conflicts_with("demo"),
        )
        .arg(
            Arg::new("demo")
                .short('d')
                .long("demo")
                .action(clap::ArgAction::SetTrue)
                .help("組み込みデモシナリオ（6機の目的地飛行）を実行"),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)。省略時は -v から決定"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .default_value("logs")
                .help("ログファイルの出力ディレクトリ"),
        )
        .arg(
            Arg::new("telemetry")
                .long("telemetry")
                .value_name("FILE")
                .help("テレメトリを JSON Lines 形式で出力するファイル"),
        )
        .get_matches();

    println!("ドローン群制御シミュレーション (Swarm Simulation) - swarmsim v0.1.0");
    println!();

    let verbose_level = matches.get_count("verbose");

    // ログ設定
    let output = match matches.get_one::<String>("log-output").map(|s| LogOutput::from_str(s)) {
        Some(Ok(output)) => output,
        Some(Err(e)) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
        None => LogOutput::Console,
    };
    let level = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or_else(|| level_for_verbosity(verbose_level));
    let log_config = LogConfig {
        level,
        output,
        log_dir: matches
            .get_one::<String>("log-dir")
            .cloned()
            .unwrap_or_else(|| "logs".to_string()),
        ..LogConfig::default()
    };
    // ガードはプロセス終了まで保持する
    let _log_guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: ログ初期化に失敗しました: {}", e);
            std::process::exit(1);
        }
    };

    if verbose_level > 0 {
        println!("詳細出力レベル: {}", verbose_level);
    }

    let info_only = matches.get_flag("info");
    let telemetry = matches.get_one::<String>("telemetry").map(String::as_str);

    let result = if matches.get_flag("demo") {
        run_config(ScenarioConfig::demo(), info_only, verbose_level, telemetry)
    } else if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        run_scenario(scenario_path, info_only, verbose_level, telemetry)
    } else {
        // デフォルト動作: 利用可能なシナリオ一覧を表示
        show_default_help();
        Ok(())
    };

    match result {
        Ok(_) => {
            if verbose_level > 0 {
                println!("シナリオ実行が正常に完了しました。");
            }
        }
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    }
}

/// シナリオファイルを読み込んで実行
fn run_scenario(
    scenario_path: &str,
    info_only: bool,
    verbose_level: u8,
    telemetry: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = ScenarioConfig::from_file(scenario_path)?;

    if verbose_level > 0 {
        println!("シナリオファイル読み込み完了: {}", scenario_path);
    }

    run_config(scenario, info_only, verbose_level, telemetry)
}

fn run_config(
    scenario: ScenarioConfig,
    info_only: bool,
    verbose_level: u8,
    telemetry: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    // 情報表示のみの場合
    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    execute_scenario(scenario, verbose_level, telemetry)
}

/// シナリオの実行
fn execute_scenario(
    scenario: ScenarioConfig,
    verbose_level: u8,
    telemetry: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    scenario.print_summary();
    println!();

    let mut simulation = SimulationEngine::new(scenario, verbose_level);
    if let Some(path) = telemetry {
        simulation = simulation.with_telemetry_output(path)?;
        println!("テレメトリ出力先: {}", path);
    }
    simulation.initialize()?;

    simulation.run()?;

    Ok(())
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  swarmsim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>     シナリオファイルを指定して実行");
    println!("  -d, --demo                組み込みデモシナリオを実行");
    println!("  -i, --info                シナリオ情報のみ表示");
    println!("  -v, --verbose             詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-output <OUTPUT> ログ出力先 (console, file, both)");
    println!("      --log-level <LEVEL>   ログレベル");
    println!("      --log-dir <DIR>       ログディレクトリ");
    println!("      --telemetry <FILE>    テレメトリ出力ファイル (JSON Lines)");
    println!("  -h, --help                このヘルプを表示");
    println!();
    println!("利用可能なシナリオ:");
    println!("  scenarios/fly_to.yaml          - 格子編隊による目的地飛行");
    println!("  scenarios/escort.yaml          - 移動目標の護衛と隊長追従");
    println!("  scenarios/shooting_squad.yaml  - 射撃分隊と参照欠落時の挙動");
    println!("  scenarios/obstacle_run.yaml    - 障害物を回避しながらのウェイポイント周回");
    println!();
    println!("例:");
    println!("  swarmsim -d");
    println!("  swarmsim -s scenarios/fly_to.yaml -v");
    println!("  swarmsim -s scenarios/escort.yaml --telemetry telemetry.jsonl");
    println!("  swarmsim -s scenarios/obstacle_run.yaml -i");
}
