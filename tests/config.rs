mod common;

mod tests {
    use crate::common::{MemVolume, OwnedSource};
    use strandcast::config::parser::log_diagnostic;
    use strandcast::config::{Config, ConfigStream, RunMode, SceneStep, CONFIG_FILE};
    use strandcast::pixel::MapChannel;
    use strandcast::storage::{MemSource, Volume};
    use strandcast::Rgb;

    fn parse(text: &str) -> Result<(ConfigStream<MemSource<'_>>, Config), (u32, &'static str)> {
        let mut stream = ConfigStream::new(MemSource::new(text.as_bytes()));
        let mut config = Config::default();
        match stream.parse(&mut config) {
            Ok(()) => Ok((stream, config)),
            Err(error) => Err((error.line, error.cause)),
        }
    }

    #[test]
    fn minimal_config_round_trips() {
        let text = r#"
            rf { node: 7; mesh: 0xABCD; }
            leds { length: 16; framerate: 20; }
            mode "scene" { scene 3 { pause: 500; dim: & rgb(255,0,0); } }
        "#;

        let (mut stream, config) = parse(text).unwrap();
        assert_eq!(config.rf.node, 7);
        assert_eq!(config.rf.mesh, 0xABCD);
        assert_eq!(config.leds.length, 16);
        assert_eq!(config.leds.framerate, 20);
        assert_eq!(config.mode.mode, Some(RunMode::Scene));

        let offset = stream.scene_offset(&config, 3);
        assert_ne!(offset, 0);

        // The scene plays a 500 ms pause followed by a red dim
        let (step, next) = stream.next_command(offset).unwrap().unwrap();
        assert_eq!(step, SceneStep::Pause(500));

        let (step, next) = stream.next_command(next).unwrap().unwrap();
        assert_eq!(step, SceneStep::Dim(Rgb::new(255, 0, 0)));

        assert_eq!(stream.next_command(next).unwrap(), None);
    }

    #[test]
    fn missing_scenes_have_no_offset() {
        let text = r#"mode "scene" { scene 3 { pause: 1; } }"#;
        let (mut stream, config) = parse(text).unwrap();
        assert_eq!(stream.scene_offset(&config, 4), 0);
        assert_eq!(stream.scene_offset(&config, 100), 0);
    }

    #[test]
    fn high_scene_indices_are_found_linearly() {
        let text = r#"
            mode "scene" {
                listen: 400;
                scene 2 { pause: 20; }
                scene 12 { pause: 120; }
                scene 13 { pause: 130; }
            }
        "#;
        let (mut stream, config) = parse(text).unwrap();
        assert_eq!(config.mode.listen, 400);

        // Beyond the direct table the mode block is scanned
        let offset = stream.scene_offset(&config, 13);
        assert_ne!(offset, 0);
        let (step, _) = stream.next_command(offset).unwrap().unwrap();
        assert_eq!(step, SceneStep::Pause(130));

        // Direct slots still work afterwards
        let offset = stream.scene_offset(&config, 2);
        let (step, _) = stream.next_command(offset).unwrap().unwrap();
        assert_eq!(step, SceneStep::Pause(20));
    }

    #[test]
    fn integer_literal_bases() {
        let text = "rf { frequency: 433000000; } leds { length: 0x10; framerate: 017; }";
        let (_, config) = parse(text).unwrap();
        assert_eq!(config.rf.frequency, 433_000_000);
        assert_eq!(config.leds.length, 16);
        assert_eq!(config.leds.framerate, 15);
    }

    #[test]
    fn color_literals() {
        let (_, config) = parse("leds { dim: & rgb(10, 50%, 0); }").unwrap();
        assert_eq!(config.leds.dim, Rgb::new(10, 127, 0));

        let (_, config) = parse("leds { dim: & cmy(0, 255, 100%); }").unwrap();
        assert_eq!(config.leds.dim, Rgb::new(255, 0, 0));

        let (_, config) = parse("leds { dim: & 100; }").unwrap();
        assert_eq!(config.leds.dim, Rgb::new(100, 100, 100));
    }

    #[test]
    fn comments_are_skipped() {
        let text = "
            // line comment
            leds /* inline */ {
                length: 42; // trailing
                /* block
                   spanning lines */
                framerate: 5;
            }
        ";
        let (_, config) = parse(text).unwrap();
        assert_eq!(config.leds.length, 42);
        assert_eq!(config.leds.framerate, 5);
    }

    #[test]
    fn map_blocks_fill_the_persistent_table() {
        let text = "
            leds {
                map {
                    0: [0 .. 15] = rgb([^ .. 47 % 3], [1 .. 48 % 3], [2 .. 49 % 3]);
                    1: [10] = & rgb(1, 2, 3);
                    2: [15 .. 0] = cmy(128, [^ .. $], 0);
                }
            }
        ";
        let (_, config) = parse(text).unwrap();
        assert_eq!(config.leds.maps.len(), 3);

        let map = &config.leds.maps[0];
        assert_eq!((map.string, map.begin, map.end, map.step), (0, 0, 15, 1));
        assert_eq!(map.red, MapChannel::sweep(0, 45, 3));
        assert!(!map.cmy);

        let map = &config.leds.maps[1];
        assert_eq!((map.begin, map.end, map.step), (10, 10, 1));
        assert_eq!(map.red, MapChannel::Fixed(1));
        assert_eq!(map.green, MapChannel::Fixed(2));
        assert_eq!(map.blue, MapChannel::Fixed(3));

        let map = &config.leds.maps[2];
        assert_eq!((map.begin, map.end, map.step), (15, 0, -1));
        assert!(map.cmy);
        assert_eq!(map.red, MapChannel::Fixed(128));
        assert_eq!(map.green, MapChannel::sweep(0, 1499, 1));
    }

    #[test]
    fn range_end_is_adjusted_to_whole_steps() {
        let text = "leds { map { 0: [0 .. 10 % 4] = & 1; } }";
        let (_, config) = parse(text).unwrap();
        let map = &config.leds.maps[0];
        // 0..10 by 4 only reaches 8
        assert_eq!((map.begin, map.end, map.step), (0, 8, 4));
    }

    #[test]
    fn default_block_is_recorded_and_replayable() {
        let text = "
            leds {
                length: 8;
                default { 0: [0 .. 7] = & rgb(9, 8, 7); }
            }
        ";
        let (mut stream, config) = parse(text).unwrap();
        assert_ne!(config.leds.default_block, 0);
        // The default block is not part of the persistent maps
        assert!(config.leds.maps.is_empty());

        let mut seen = Vec::new();
        stream
            .map_block(config.leds.default_block, |map| seen.push(map))
            .unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].red, MapChannel::Fixed(9));
    }

    #[test]
    fn transient_scene_maps_parse_as_offsets() {
        let text = r#"
            mode "scene" {
                scene 0 {
                    map { 0: [0] = & 5; }
                    pause: 10;
                }
            }
        "#;
        let (mut stream, config) = parse(text).unwrap();
        let offset = stream.scene_offset(&config, 0);
        let (step, next) = stream.next_command(offset).unwrap().unwrap();
        let SceneStep::Map(map_offset) = step else {
            panic!("expected a map step");
        };

        let mut seen = Vec::new();
        stream.map_block(map_offset, |map| seen.push(map)).unwrap();
        assert_eq!(seen.len(), 1);

        // Parsing continues after the block
        let (step, _) = stream.next_command(next).unwrap().unwrap();
        assert_eq!(step, SceneStep::Pause(10));
    }

    #[test]
    fn scene_clip_statements_carry_the_file_name() {
        let text = r#"mode "scene" { scene 0 { "clip.tp2"; } }"#;
        let (mut stream, config) = parse(text).unwrap();
        let offset = stream.scene_offset(&config, 0);
        let (step, _) = stream.next_command(offset).unwrap().unwrap();
        let SceneStep::Tpm2(name) = step else {
            panic!("expected a clip step");
        };
        assert_eq!(name.as_str(), "clip.tp2");
    }

    #[test]
    fn rejected_configs_report_the_line() {
        let err = parse("leds {\n length: 9999999;\n}").unwrap_err();
        assert_eq!(err.0, 2);
        assert_eq!(err.1, "Invalid string length");

        let err = parse("leds { bogus: 1; }").unwrap_err();
        assert_eq!(err.1, "Unknown keyword");

        let err = parse("rf { node: 0; }").unwrap_err();
        assert_eq!(err.1, "Invalid RF node");
    }

    #[test]
    fn the_mode_may_only_be_set_once() {
        let err = parse(r#"mode "rx" { } mode "tx" { }"#).unwrap_err();
        assert_eq!(err.1, "Mode already set");

        let err = parse(r#"mode "warp" { }"#).unwrap_err();
        assert_eq!(err.1, "Unknown mode");
    }

    #[test]
    fn validation_ranges_hold() {
        assert!(parse("rf { frequency: 100; }").is_err());
        assert!(parse("rf { power: 14; }").is_err());
        assert!(parse("rf { sensitivity: 1; }").is_err());
        assert!(parse("rf { mesh: 0xFFFF; }").is_err());
        assert!(parse("leds { framerate: 31; }").is_err());
        assert!(parse(r#"mode "rx" { listen: 0; }"#).is_err());
        assert!(parse(r#"mode "rx" { listen: 20001; }"#).is_err());
    }

    #[test]
    fn diagnostics_are_appended_to_the_file() {
        let mut volume = MemVolume::new().with_file(CONFIG_FILE, b"rf { node: 0; }");

        let error = {
            let source = volume.open(CONFIG_FILE).unwrap();
            let mut stream: ConfigStream<OwnedSource> = ConfigStream::new(source);
            let mut config = Config::default();
            stream.parse(&mut config).unwrap_err()
        };

        assert!(log_diagnostic(&mut volume, CONFIG_FILE, &error));
        let contents = String::from_utf8(volume.contents(CONFIG_FILE).unwrap()).unwrap();
        assert!(contents.contains("At line 1: Invalid RF node"));
    }

    #[test]
    fn string_escapes() {
        let text = r#"mode "scene" { scene 0 { "a\tb\\c\"d"; } }"#;
        let (mut stream, config) = parse(text).unwrap();
        let offset = stream.scene_offset(&config, 0);
        let (step, _) = stream.next_command(offset).unwrap().unwrap();
        let SceneStep::Tpm2(name) = step else {
            panic!("expected a clip step");
        };
        assert_eq!(name.as_str(), "a\tb\\c\"d");
    }
}
