//! Device model over the iiod client, against an in-memory daemon.

mod common;

use common::{remote_context, FakeIiod};
use rust_iio::{Buffer, EventStream};

// =============================================================================
// Topology
// =============================================================================

#[test]
fn test_topology_from_print() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);

    assert_eq!(fake.requests(), ["PRINT"]);
    assert_eq!(ctx.attr("hw_model"), Some("Test board"));

    let ids: Vec<_> = ctx.devices().map(|d| d.id().to_string()).collect();
    assert_eq!(ids, ["iio:device0", "iio:device1", "trigger0"]);

    let adc = ctx.find_device("adc0").unwrap();
    let chans: Vec<_> = adc.channels().map(|c| c.id().to_string()).collect();
    assert_eq!(chans, ["voltage0", "voltage1", "temp"]);

    let v0 = adc.find_channel("voltage0", false).unwrap();
    let attrs: Vec<_> = v0.attrs().iter().map(|a| a.name.as_str()).collect();
    assert_eq!(attrs, ["raw", "scale"]);
    assert_eq!(v0.data_format().scale, Some(0.5));
    assert!(ctx.find_device("sysfstrig0").unwrap().is_trigger());
}

// =============================================================================
// Attributes
// =============================================================================

#[test]
fn test_attribute_requests_on_the_wire() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);
    fake.clear_requests();

    let adc = ctx.find_device("iio:device0").unwrap();
    assert_eq!(adc.read_attr_i64("sampling_frequency").unwrap(), 1000);
    adc.write_attr("sampling_frequency", "2000").unwrap();
    assert_eq!(adc.read_attr("sampling_frequency").unwrap(), "2000");
    assert_eq!(adc.read_buffer_attr("length").unwrap(), "0");

    let v0 = adc.find_channel("voltage0", false).unwrap();
    assert_eq!(v0.read_attr_i64("raw").unwrap(), -12);
    assert_eq!(v0.read_attr_f64("scale").unwrap(), 0.5);

    let dac = ctx.find_device("dac").unwrap();
    let out = dac.find_channel("altvoltage0", true).unwrap();
    out.write_attr_i64("raw", 1023).unwrap();
    assert_eq!(fake.attr("iio:device1|OUTPUT altvoltage0|raw").as_deref(), Some("1023"));

    assert_eq!(
        fake.requests(),
        [
            "READ iio:device0 sampling_frequency",
            "WRITE iio:device0 sampling_frequency 5",
            "READ iio:device0 sampling_frequency",
            "READ iio:device0 BUFFER length",
            "READ iio:device0 INPUT voltage0 raw",
            "READ iio:device0 INPUT voltage0 scale",
            "WRITE iio:device1 OUTPUT altvoltage0 raw 5",
        ]
    );
}

#[test]
fn test_missing_attribute_is_not_found() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);
    let adc = ctx.find_device("adc").unwrap();

    let err = adc.read_debug_attr("direct_reg_access").unwrap_err();
    assert!(err.is_not_found());

    // The connection is still in step after the error.
    assert_eq!(adc.read_attr("sampling_frequency").unwrap(), "1000");
    assert_eq!(fake.interleaved(), 0);
}

// =============================================================================
// Buffers
// =============================================================================

#[test]
fn test_capture_through_readbuf() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);
    let adc = ctx.find_device("iio:device0").unwrap();

    let v0 = adc.find_channel("voltage0", false).unwrap();
    let v1 = adc.find_channel("voltage1", false).unwrap();
    let mut mask = adc.create_channels_mask().unwrap();
    v0.enable(&mut mask);
    v1.enable(&mut mask);

    let mut buf = Buffer::open(&adc, 4, false, &mask).unwrap();
    assert_eq!(fake.open_mask("iio:device0").as_deref(), Some("00000003"));
    assert_eq!(buf.step(), 4);

    let samples: Vec<i16> = vec![1, -1, 2, -2, 3, -3, 4, -4];
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    fake.queue_samples(&bytes);

    assert_eq!(buf.refill().unwrap(), 16);
    assert_eq!(buf.data(), bytes.as_slice());

    let mut out = [0u8; 8];
    assert_eq!(v1.read(&buf, &mut out), 8);
    let v1_values: Vec<i16> = out
        .chunks_exact(2)
        .map(|c| i16::from_ne_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(v1_values, [-1, -2, -3, -4]);

    drop(buf);
    assert_eq!(fake.open_mask("iio:device0"), None);
    assert!(fake.requests().contains(&"READBUF iio:device0 16".to_string()));
    assert!(fake.requests().contains(&"CLOSE iio:device0".to_string()));
}

#[test]
fn test_short_readbuf_reports_received_bytes() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);
    let adc = ctx.find_device("iio:device0").unwrap();
    let mut mask = adc.create_channels_mask().unwrap();
    adc.find_channel("voltage0", false).unwrap().enable(&mut mask);

    let mut buf = Buffer::open(&adc, 8, false, &mask).unwrap();
    fake.queue_samples(&[0x10, 0x00, 0x20, 0x00]);
    assert_eq!(buf.refill().unwrap(), 4);
    assert_eq!(buf.data(), &[0x10, 0x00, 0x20, 0x00]);
    buf.close();
    assert_eq!(fake.interleaved(), 0);
}

#[test]
fn test_playback_through_writebuf() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);
    let dac = ctx.find_device("iio:device1").unwrap();
    let chn = dac.find_channel("altvoltage0", true).unwrap();
    let mut mask = dac.create_channels_mask().unwrap();
    chn.enable(&mut mask);

    let mut buf = Buffer::open(&dac, 3, true, &mask).unwrap();
    assert!(buf.is_output());
    assert!(fake.requests().contains(&"OPEN iio:device1 3 00000001 CYCLIC".to_string()));

    let values: Vec<u8> = [100u16, 200, 300].iter().flat_map(|v| v.to_ne_bytes()).collect();
    assert_eq!(chn.write(&mut buf, &values), 6);
    assert_eq!(buf.push().unwrap(), 6);

    assert!(fake.requests().contains(&"WRITEBUF iio:device1 6".to_string()));
    assert_eq!(fake.take_samples(), [100, 0, 200, 0, 44, 1]);
}

// =============================================================================
// Triggers, kernel buffers, timeout, version
// =============================================================================

#[test]
fn test_trigger_round_trip() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);
    let adc = ctx.find_device("iio:device0").unwrap();
    let trigger = ctx.find_device("trigger0").unwrap();

    assert_eq!(adc.trigger().unwrap(), None);
    adc.set_trigger(Some(&trigger)).unwrap();
    assert_eq!(adc.trigger().unwrap(), Some(trigger.clone()));
    adc.set_trigger(None).unwrap();
    assert_eq!(adc.trigger().unwrap(), None);

    // A non-trigger device is rejected before anything is sent.
    let before = fake.requests().len();
    let dac = ctx.find_device("iio:device1").unwrap();
    assert!(adc.set_trigger(Some(&dac)).is_err());
    assert_eq!(fake.requests().len(), before);

    let settrig: Vec<_> = fake
        .requests()
        .into_iter()
        .filter(|r| r.starts_with("SETTRIG"))
        .collect();
    assert_eq!(settrig, ["SETTRIG iio:device0 trigger0", "SETTRIG iio:device0"]);
}

#[test]
fn test_kernel_buffers_count() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);
    let adc = ctx.find_device("iio:device0").unwrap();

    adc.set_kernel_buffers_count(8).unwrap();
    assert_eq!(fake.buffers_count("iio:device0"), Some(8));
    assert!(adc.set_kernel_buffers_count(0).is_err());
    assert_eq!(fake.requests().last().unwrap(), "SET iio:device0 BUFFERS_COUNT 8");
}

#[test]
fn test_timeout_sends_half_to_daemon() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);

    ctx.set_timeout(3000).unwrap();
    assert_eq!(ctx.timeout_ms(), 3000);
    assert_eq!(fake.requests().last().unwrap(), "TIMEOUT 1500");
}

#[test]
fn test_daemon_version() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);
    let version = ctx.version().unwrap();
    assert_eq!((version.major, version.minor), (0, 26));
    assert_eq!(version.git_tag, "fake0ff");
}

// =============================================================================
// Unsupported slots
// =============================================================================

#[test]
fn test_unsupported_slots_send_nothing() {
    let fake = FakeIiod::new();
    let ctx = remote_context(&fake);
    let adc = ctx.find_device("iio:device0").unwrap();
    let before = fake.requests().len();

    assert!(EventStream::open(&adc).unwrap_err().is_not_supported());
    assert!(ctx.try_clone().unwrap_err().is_not_supported());

    let mut mask = adc.create_channels_mask().unwrap();
    adc.find_channel("voltage0", false).unwrap().enable(&mut mask);
    let buf = Buffer::open(&adc, 1, false, &mask).unwrap();
    let after_open = fake.requests().len();
    assert!(buf.poll_fd().unwrap_err().is_not_supported());
    assert!(buf.set_blocking_mode(false).unwrap_err().is_not_supported());
    assert_eq!(fake.requests().len(), after_open);
    assert_eq!(after_open, before + 1);
}
