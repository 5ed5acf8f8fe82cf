#[cfg(not(all(feature = "vgm-import", feature = "realtime")))]
fn main() {
    eprintln!(
        "The opn2kit CLI requires the \"vgm-import\" and \"realtime\" features (enabled by default)."
    );
}

#[cfg(all(feature = "vgm-import", feature = "realtime"))]
mod cli {
    use anyhow::{anyhow, bail, Context, Result};
    use std::env;
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    use opn2kit::realtime::RealtimeGenerator;
    use opn2kit::synth::{ChordType, Generator};
    use opn2kit::vgm_import::VgmImporter;
    use opn2kit::{EngineConfig, ImportOptions, Instrument};

    const BLOCK_FRAMES: usize = 512;

    /// Share of the render length during which the note is held
    const HOLD_RATIO: f32 = 0.75;

    const USAGE: &str = "Usage:
  opn2kit import <file.vgm> [--json|--csv] [--dedupe]
  opn2kit render <file.vgm> <out.wav> [--index N] [--note N] [--chord NAME]
                 [--seconds S] [--config cfg.json] [--dedupe]

Chords: major, minor, augmented, diminished, major7, minor7

Set RUST_LOG=debug for import details.";

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum OutputFormat {
        Table,
        Json,
        Csv,
    }

    #[derive(Debug)]
    struct RenderArgs {
        input: PathBuf,
        output: PathBuf,
        index: usize,
        note: u32,
        chord: Option<ChordType>,
        seconds: f32,
        config: Option<PathBuf>,
        dedupe: bool,
    }

    fn next_value<T: std::str::FromStr>(
        args: &mut impl Iterator<Item = String>,
        flag: &str,
    ) -> Result<T> {
        let value = args
            .next()
            .ok_or_else(|| anyhow!("{flag} requires an argument"))?;
        value
            .parse()
            .map_err(|_| anyhow!("invalid value for {flag}: {value}"))
    }

    fn import_instruments(path: &Path, dedupe: bool) -> Result<Vec<Instrument>> {
        let data = fs::read(path).with_context(|| format!("cannot open {}", path.display()))?;
        let importer = VgmImporter::new(ImportOptions {
            dedupe,
            ..ImportOptions::default()
        });
        let import = importer
            .import_bytes(&data)
            .with_context(|| format!("cannot import {}", path.display()))?;
        log::info!(
            "{}: {} register writes, {} key-ons",
            path.display(),
            import.register_writes,
            import.key_ons
        );
        Ok(import.instruments)
    }

    fn print_table(instruments: &[Instrument]) {
        println!("{} instrument(s)", instruments.len());
        for ins in instruments {
            println!(
                "\n{:<32} ALG {}  FB {}  AMS {}  FMS {}",
                ins.name(),
                ins.algorithm,
                ins.feedback,
                ins.am_sensitivity,
                ins.fm_sensitivity
            );
            println!("      AR D1R D2R  RR D1L  TL MUL  DT  RS  AM SSG");
            for (slot, op) in ins.operators.iter().enumerate() {
                println!(
                    "  {} {:>4} {:>3} {:>3} {:>3} {:>3} {:>3} {:>3} {:>3} {:>3} {:>3} {:>3}",
                    ["OP1", "OP3", "OP2", "OP4"][slot],
                    op.attack,
                    op.decay1,
                    op.decay2,
                    op.release,
                    op.sustain,
                    op.level,
                    op.fmult,
                    op.detune,
                    op.ratescale,
                    op.am_enable as u8,
                    op.ssg_eg
                );
            }
        }
    }

    fn write_csv(instruments: &[Instrument]) -> Result<()> {
        let mut writer = csv::Writer::from_writer(io::stdout());
        let mut header: Vec<String> = ["name", "algorithm", "feedback", "ams", "fms"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for op in ["op1", "op3", "op2", "op4"] {
            for field in ["ar", "d1r", "d2r", "rr", "d1l", "tl", "mul", "dt", "rs", "am", "ssg"] {
                header.push(format!("{op}_{field}"));
            }
        }
        writer.write_record(&header)?;

        for ins in instruments {
            let mut row = vec![
                ins.name().to_string(),
                ins.algorithm.to_string(),
                ins.feedback.to_string(),
                ins.am_sensitivity.to_string(),
                ins.fm_sensitivity.to_string(),
            ];
            for op in &ins.operators {
                row.extend(
                    [
                        op.attack,
                        op.decay1,
                        op.decay2,
                        op.release,
                        op.sustain,
                        op.level,
                        op.fmult,
                        op.detune,
                        op.ratescale,
                        op.am_enable as u8,
                        op.ssg_eg,
                    ]
                    .iter()
                    .map(|v| v.to_string()),
                );
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn run_import(mut args: impl Iterator<Item = String>) -> Result<()> {
        let mut input: Option<PathBuf> = None;
        let mut format = OutputFormat::Table;
        let mut dedupe = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--json" => format = OutputFormat::Json,
                "--csv" => format = OutputFormat::Csv,
                "--dedupe" => dedupe = true,
                _ if arg.starts_with('-') => bail!("unknown flag: {arg}\n\n{USAGE}"),
                _ => input = Some(PathBuf::from(arg)),
            }
        }
        let input = input.ok_or_else(|| anyhow!("missing input file\n\n{USAGE}"))?;

        let instruments = import_instruments(&input, dedupe)?;
        match format {
            OutputFormat::Table => print_table(&instruments),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&instruments)?),
            OutputFormat::Csv => write_csv(&instruments)?,
        }
        Ok(())
    }

    fn parse_render_args(mut args: impl Iterator<Item = String>) -> Result<RenderArgs> {
        let mut positional = Vec::new();
        let mut render = RenderArgs {
            input: PathBuf::new(),
            output: PathBuf::new(),
            index: 0,
            note: 60,
            chord: None,
            seconds: 2.0,
            config: None,
            dedupe: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--index" => render.index = next_value(&mut args, "--index")?,
                "--note" => render.note = next_value(&mut args, "--note")?,
                "--seconds" => render.seconds = next_value(&mut args, "--seconds")?,
                "--config" => render.config = Some(next_value(&mut args, "--config")?),
                "--dedupe" => render.dedupe = true,
                "--chord" => {
                    let name: String = next_value(&mut args, "--chord")?;
                    render.chord = Some(
                        ChordType::from_name(&name.to_lowercase())
                            .ok_or_else(|| anyhow!("unknown chord: {name}"))?,
                    );
                }
                _ if arg.starts_with('-') => bail!("unknown flag: {arg}\n\n{USAGE}"),
                _ => positional.push(PathBuf::from(arg)),
            }
        }

        match <[PathBuf; 2]>::try_from(positional) {
            Ok([input, output]) => {
                render.input = input;
                render.output = output;
            }
            Err(_) => bail!("render needs an input and an output file\n\n{USAGE}"),
        }
        if render.seconds.is_nan() || render.seconds <= 0.0 {
            bail!("--seconds must be positive");
        }
        Ok(render)
    }

    fn make_synth(config: &EngineConfig) -> Generator {
        #[cfg(feature = "softsynth")]
        {
            Generator::with_softsynth(config.chip, config.sample_rate)
        }
        #[cfg(not(feature = "softsynth"))]
        {
            log::warn!("built without the softsynth feature; rendering silence");
            Generator::with_null_chip(config.sample_rate)
        }
    }

    fn run_render(args: impl Iterator<Item = String>) -> Result<()> {
        let args = parse_render_args(args)?;
        let config = match &args.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };

        let instruments = import_instruments(&args.input, args.dedupe)?;
        let instrument = instruments.get(args.index).ok_or_else(|| {
            anyhow!(
                "instrument {} not found ({} captured)",
                args.index,
                instruments.len()
            )
        })?;
        println!("Rendering \"{}\" to {}", instrument.name(), args.output.display());

        let (control, mut renderer) = RealtimeGenerator::build(make_synth(&config), &config)?;
        control.change_patch(instrument, false);
        control.change_note(args.note);
        match args.chord {
            Some(chord) => control.play_chord(chord),
            None => control.play_note(),
        }

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: config.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&args.output, spec)
            .with_context(|| format!("cannot create {}", args.output.display()))?;

        let total_frames = (args.seconds * config.sample_rate as f32) as usize;
        let release_at = (total_frames as f32 * HOLD_RATIO) as usize;
        let mut frames = vec![0i16; BLOCK_FRAMES * 2];
        let mut rendered = 0;
        let mut released = false;

        while rendered < total_frames {
            if !released && rendered >= release_at {
                control.note_off_all_chans();
                released = true;
            }
            let count = (total_frames - rendered).min(BLOCK_FRAMES);
            renderer.generate(&mut frames, count);
            for &sample in &frames[..count * 2] {
                writer.write_sample(sample)?;
            }
            rendered += count;
        }
        writer.finalize()?;

        let stats = control.stats();
        println!(
            "{} frames, {} callbacks, {} messages applied",
            rendered, stats.callbacks, stats.messages_applied
        );
        Ok(())
    }

    pub fn run() -> Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

        let mut args = env::args().skip(1);
        match args.next().as_deref() {
            Some("import") => run_import(args),
            Some("render") => run_render(args),
            Some("--help") | Some("-h") => {
                println!("{USAGE}");
                Ok(())
            }
            Some(other) => Err(anyhow!("unknown command: {other}\n\n{USAGE}")),
            None => Err(anyhow!("missing command\n\n{USAGE}")),
        }
    }

}

#[cfg(all(feature = "vgm-import", feature = "realtime"))]
fn main() -> anyhow::Result<()> {
    cli::run()
}
