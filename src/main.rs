//! Kommandozeilen-Frontend der Matching-Engine (Test-Harness).
//!
//! Liest ein Eingabe-JSON von stdin oder aus einer Datei, laesst wahlweise
//! den Einmal-, den inkrementellen oder den Thread-Matcher laufen und gibt
//! das Ergebnis-JSON (oder nur die Scores) aus.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use swipe_curve_matcher::{
    json, CurveMatch, CurveWorker, IncrementalMatch, Matcher, Params, Point,
};

struct CliOptions {
    tree_file: PathBuf,
    input_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
    default_params: bool,
    implementation: u32,
    show_scores: bool,
    debug: bool,
    /// Verzoegerung zwischen Kurvenpunkten in Mikrosekunden (Thread-Modus)
    delay_us: u64,
    repeat: u32,
}

fn usage(progname: &str) -> ! {
    eprintln!("usage:");
    eprintln!("cat file.json | {progname} [<optionen>] <tree-datei>");
    eprintln!("{progname} [<optionen>] <tree-datei> <eingabe-json>");
    eprintln!("optionen:");
    eprintln!(" -d : Default-Parameter verwenden");
    eprintln!(" -D : Debug-Ausgaben abschalten");
    eprintln!(" -l <datei> : Log-Datei (IN/OUT-Mitschnitt)");
    eprintln!(" -a <nr> : Implementierung (0: einmal, 1: inkrementell, 2: Thread)");
    eprintln!(" -s : nur Scores ausgeben (statt komplettem JSON)");
    eprintln!(" -m <us> : Verzoegerung zwischen Kurvenpunkten (Thread-Modus)");
    eprintln!(" -r <anzahl> : Wiederholungen (fuers Profiling)");
    std::process::exit(1);
}

fn parse_args() -> CliOptions {
    let args: Vec<String> = std::env::args().collect();
    let progname = args.first().map(String::as_str).unwrap_or("swipe-cli");

    let mut options = CliOptions {
        tree_file: PathBuf::new(),
        input_file: None,
        log_file: None,
        default_params: false,
        implementation: 0,
        show_scores: false,
        debug: true,
        delay_us: 0,
        repeat: 1,
    };

    let mut positional = Vec::new();
    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        let mut value = |i: &mut usize| -> String {
            *i += 1;
            if *i >= args.len() {
                usage(progname);
            }
            args[*i].clone()
        };
        match arg.as_str() {
            "-d" => options.default_params = true,
            "-D" => options.debug = false,
            "-s" => options.show_scores = true,
            "-l" => options.log_file = Some(PathBuf::from(value(&mut i))),
            "-a" => {
                options.implementation = value(&mut i).parse().unwrap_or_else(|_| usage(progname))
            }
            "-m" => options.delay_us = value(&mut i).parse().unwrap_or_else(|_| usage(progname)),
            "-r" => options.repeat = value(&mut i).parse().unwrap_or_else(|_| usage(progname)),
            _ if arg.starts_with('-') => usage(progname),
            _ => positional.push(arg.clone()),
        }
        i += 1;
    }

    match positional.len() {
        1 => options.tree_file = PathBuf::from(&positional[0]),
        2 => {
            options.tree_file = PathBuf::from(&positional[0]);
            options.input_file = Some(PathBuf::from(&positional[1]));
        }
        _ => usage(progname),
    }
    if options.implementation > 2 {
        usage(progname);
    }
    options
}

fn read_input(options: &CliOptions) -> Result<String> {
    match &options.input_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Eingabe nicht lesbar: {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("stdin nicht lesbar")?;
            Ok(input)
        }
    }
}

fn build_matcher(options: &CliOptions, base: CurveMatch) -> Box<dyn Matcher> {
    match options.implementation {
        0 => Box::new(base),
        _ => Box::new(IncrementalMatch::from_base(base)),
    }
}

fn print_result(options: &CliOptions, result_json: &str) -> Result<()> {
    if options.show_scores {
        let value: serde_json::Value =
            serde_json::from_str(result_json).context("Ergebnis nicht lesbar")?;
        if let Some(candidates) = value["candidates"].as_array() {
            for c in candidates {
                println!(
                    "{} {}",
                    c["name"].as_str().unwrap_or("?"),
                    c["score"].as_f64().unwrap_or(0.0)
                );
            }
        }
    } else {
        println!("Result: {result_json}");
    }
    Ok(())
}

fn run() -> Result<()> {
    let options = parse_args();

    env_logger::Builder::from_default_env()
        .filter_level(if options.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    log::info!("swipe-cli v{} startet...", env!("CARGO_PKG_VERSION"));

    let input = read_input(&options)?;

    // Vorlage einmal parsen; jeder Lauf bekommt eine frische Kopie
    let mut template = CurveMatch::new();
    template.set_params(Params::load_from_file(&Params::config_path()));
    template.load_tree(&options.tree_file)?;
    json::parse_input(&mut template, &input).context("Eingabe-JSON fehlerhaft")?;
    if options.default_params {
        template.set_params(Params::default());
    }
    template.set_debug(options.debug);
    template.set_log_file(options.log_file.clone());

    let points: Vec<(Point, i32)> = template
        .curve()
        .iter()
        .map(|p| (p.pos, p.t))
        .collect();

    let repeat = if options.implementation == 2 {
        1
    } else {
        options.repeat.max(1)
    };

    for _ in 0..repeat {
        // Punkte-Zufuhr simulieren (wie beim echten Zeichnen)
        let mut matcher = build_matcher(&options, template.clone());
        matcher.clear_curve();

        if options.implementation == 2 {
            let worker = CurveWorker::spawn(matcher);
            for &(point, t) in &points {
                if options.delay_us > 0 {
                    std::thread::sleep(std::time::Duration::from_micros(options.delay_us));
                }
                worker.add_point(point, t);
            }
            worker.end_curve(-1);
            log::info!("Warte auf Worker...");
            let result = worker.take_result().context("Worker lieferte kein Ergebnis")?;
            worker.wait_idle();
            worker.stop();
            print_result(&options, &result)?;
        } else {
            for &(point, t) in &points {
                matcher.add_point(point, t);
            }
            matcher.end_curve(-1);
            let base = matcher.base();
            log::info!("Match: {} Kandidaten", base.candidates().len());
            print_result(&options, &json::result_to_string(base))?;
        }
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Fehler: {e:#}");
        std::process::exit(1);
    }
}
