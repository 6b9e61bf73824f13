#![cfg(feature = "dmi")]

use dds_sim::dmi::{EdgeSampler, Interferometer};
use dds_sim::emitter::run;
use dds_sim::{DmiConfig, Engine, PackingLayout, SampleEmitter, SimConfig};

fn simulate(config: &SimConfig, samples: u64) -> Vec<u8> {
    let mut engine = Engine::new(config).unwrap();
    let mut emitter = SampleEmitter::new(Vec::new(), "capture");
    run(&mut engine, &mut emitter, Some(samples)).unwrap();
    emitter.into_inner()
}

fn dmi_config() -> DmiConfig {
    serde_json::from_str(
        r#"{
            "sample_rate": 48e6,
            "bit_ref": 0,
            "bit_meas": 1,
            "ref_min": 2.0e6,
            "ref_max": 2.0e6,
            "refpll_ki": 0,
            "refpll_kp": 0,
            "decimation": 1,
            "lock_count": 10
        }"#,
    )
    .unwrap()
}

#[test]
fn sampler_counts_reference_edges() {
    // 2 MHz at 48 MHz: a rising edge on tick 12 and every 24 ticks after
    let bytes = simulate(&SimConfig::reference_and_measurement(48e6, 2.0e6, 0), 2000);
    let mut sampler = EdgeSampler::new(PackingLayout::NIBBLES);
    let mut ref_edges = 0;
    let mut meas_edges = 0;
    sampler
        .run(&bytes[..], "capture", |edges| {
            if edges.rose(0) {
                ref_edges += 1;
            }
            if edges.rose(1) {
                meas_edges += 1;
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(sampler.ticks(), 4000);
    assert_eq!(ref_edges, 167);
    assert_eq!(meas_edges, ref_edges);
}

#[test]
fn interferometer_tracks_constant_offset() {
    let bytes = simulate(
        &SimConfig::reference_and_measurement(48e6, 2.0e6, 0x1000_0000),
        2000,
    );
    let config = dmi_config();
    config.validate().unwrap();
    let mut dmi = Interferometer::new(&config).unwrap();
    let mut sampler = EdgeSampler::new(config.layout());
    let mut positions = Vec::new();
    sampler
        .run(&bytes[..], "capture", |edges| {
            if let Some(position) = dmi.tick(edges) {
                positions.push(position);
            }
            Ok(())
        })
        .unwrap();

    assert!(dmi.dpll().locked());
    assert!(positions.len() > 100, "only {} positions", positions.len());
    // the truncated loop tuning word falls 16 units short of a turn per period
    for pair in positions.windows(2) {
        assert_eq!(pair[1] - pair[0], 16);
    }
}

#[cfg(unix)]
#[test]
fn closed_pipe_stops_simulation() {
    use std::process::{Command, Stdio};

    let mut child = Command::new("head")
        .args(["-c", "10"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    let stdin = child.stdin.take().unwrap();

    let mut engine = Engine::new(&SimConfig::default()).unwrap();
    let mut emitter = SampleEmitter::new(stdin, "head");
    let err = run(&mut engine, &mut emitter, None).unwrap_err();
    child.wait().unwrap();

    assert!(err.is_stream_closed(), "unexpected error: {}", err);
    assert!(emitter.emitted() >= 10);
    assert_eq!(engine.samples(), emitter.emitted() + 1);
}
