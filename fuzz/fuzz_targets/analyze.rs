#![no_main]
use libfuzzer_sys::fuzz_target;
use std::time::Duration;

const RULES: &str = "
rules:
  - id: fuzz.flow
    sources:
      - method: { class: Http, name: param }
    sinks:
      - method: { class: Db, name: exec }
    sanitizers:
      - method: { class: Esc, name: clean }
";

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else { return };
    let Ok(program) = ir::Program::from_json(s) else { return };
    let Ok(rules) = loader::load_rules_from_str(RULES) else { return };
    let config = engine::EngineConfig {
        max_summary_iterations: 2,
        timeout: Some(Duration::from_millis(50)),
        entry_points: Vec::new(),
    };
    let _ = engine::analyze_with_config(&program, &rules, &config);
});
