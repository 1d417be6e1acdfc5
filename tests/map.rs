mod common;

mod tests {
    use crate::common::{pixel_at, RecordingSink};
    use strandcast::pixel::{LedMap, MapChannel, PixelEngine};
    use strandcast::Rgb;

    fn engine(length: u16) -> PixelEngine<RecordingSink> {
        let mut engine = PixelEngine::new(RecordingSink::new());
        engine.configure(length, 0, Rgb::new(255, 255, 255), 0);
        engine
    }

    #[test]
    fn triplet_sweep_renders_a_monotonic_ramp() {
        const L: usize = 32;
        let mut engine = engine(L as u16);

        // Ramp buffer: 0, 1, 2, ...
        let mut buf = [0u8; 1500];
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = i as u8;
        }

        let map = LedMap {
            string: 0,
            begin: 0,
            end: L as u16 - 1,
            step: 1,
            red: MapChannel::sweep(0, 3 * L as u16 - 3, 3),
            green: MapChannel::sweep(1, 3 * L as u16 - 2, 3),
            blue: MapChannel::sweep(2, 3 * L as u16 - 1, 3),
            cmy: false,
        };
        engine.map(&map, &buf);

        let frame = engine.frame().to_vec();
        let mut previous = None;
        for i in 0..L {
            let (r, g, b) = pixel_at(&frame, 0, i);
            assert_eq!((r, g, b), ((3 * i) as u8, (3 * i + 1) as u8, (3 * i + 2) as u8));
            if let Some(prev) = previous {
                assert!(r > prev, "ramp must be strictly monotonic");
            }
            previous = Some(r);
        }
    }

    #[test]
    fn cmy_flag_inverts_all_channels() {
        let mut engine = engine(4);
        let mut buf = [0u8; 16];
        buf[0] = 0x0F;
        buf[1] = 0xF0;
        buf[2] = 0x55;

        let map = LedMap {
            string: 2,
            begin: 0,
            end: 0,
            step: 1,
            red: MapChannel::sweep(0, 0, 0),
            green: MapChannel::sweep(1, 1, 0),
            blue: MapChannel::sweep(2, 2, 0),
            cmy: true,
        };
        engine.map(&map, &buf);

        let frame = engine.frame().to_vec();
        assert_eq!(pixel_at(&frame, 2, 0), (!0x0F, !0xF0, !0x55));
    }

    #[test]
    fn static_channels_use_the_literal() {
        let mut engine = engine(4);
        let buf = [0xAAu8; 16];

        let map = LedMap {
            string: 0,
            begin: 0,
            end: 3,
            step: 1,
            red: MapChannel::Fixed(7),
            green: MapChannel::sweep(0, 15, 1),
            blue: MapChannel::Fixed(200),
            cmy: false,
        };
        engine.map(&map, &buf);

        let frame = engine.frame().to_vec();
        for i in 0..4 {
            assert_eq!(pixel_at(&frame, 0, i), (7, 0xAA, 200));
        }
    }

    #[test]
    fn short_source_wraps_over_a_longer_destination() {
        let mut engine = engine(8);
        let mut buf = [0u8; 16];
        buf[0] = 10;
        buf[1] = 20;
        buf[2] = 30;

        // Source covers three bytes, destination eight pixels
        let map = LedMap {
            string: 0,
            begin: 0,
            end: 7,
            step: 1,
            red: MapChannel::sweep(0, 2, 1),
            green: MapChannel::Fixed(0),
            blue: MapChannel::Fixed(0),
            cmy: false,
        };
        engine.map(&map, &buf);

        let frame = engine.frame().to_vec();
        let expected = [10, 20, 30, 10, 20, 30, 10, 20];
        for (i, &want) in expected.iter().enumerate() {
            assert_eq!(pixel_at(&frame, 0, i).0, want, "pixel {}", i);
        }
    }

    #[test]
    fn reversed_destination_renders_backwards() {
        let mut engine = engine(4);
        let mut buf = [0u8; 16];
        buf[0] = 1;
        buf[1] = 2;
        buf[2] = 3;
        buf[3] = 4;

        let map = LedMap {
            string: 0,
            begin: 3,
            end: 0,
            step: -1,
            red: MapChannel::sweep(0, 3, 1),
            green: MapChannel::Fixed(0),
            blue: MapChannel::Fixed(0),
            cmy: false,
        };
        engine.map(&map, &buf);

        let frame = engine.frame().to_vec();
        assert_eq!(pixel_at(&frame, 0, 3).0, 1);
        assert_eq!(pixel_at(&frame, 0, 2).0, 2);
        assert_eq!(pixel_at(&frame, 0, 1).0, 3);
        assert_eq!(pixel_at(&frame, 0, 0).0, 4);
    }

    #[test]
    fn maps_apply_in_order() {
        let mut engine = engine(4);
        let buf = [0u8; 16];

        let maps = [
            LedMap {
                string: 0,
                begin: 0,
                end: 3,
                step: 1,
                red: MapChannel::Fixed(50),
                green: MapChannel::Fixed(0),
                blue: MapChannel::Fixed(0),
                cmy: false,
            },
            // The later map overwrites pixel 1
            LedMap {
                string: 0,
                begin: 1,
                end: 1,
                step: 1,
                red: MapChannel::Fixed(99),
                green: MapChannel::Fixed(0),
                blue: MapChannel::Fixed(0),
                cmy: false,
            },
        ];
        engine.maps(&maps, &buf);

        let frame = engine.frame().to_vec();
        assert_eq!(pixel_at(&frame, 0, 0).0, 50);
        assert_eq!(pixel_at(&frame, 0, 1).0, 99);
        assert_eq!(pixel_at(&frame, 0, 2).0, 50);
    }
}
