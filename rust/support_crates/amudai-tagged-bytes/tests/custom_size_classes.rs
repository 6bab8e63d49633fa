use std::sync::{Arc, Once};

use amudai_tagged_bytes::{
    Bytes, ErrorKind, HEADER_SIZE, Payload, SizeClasses, attach, is_attached, read, read_as,
    slice,
};

const CLASSES: [usize; 4] = [64, 128, 256, 512];

fn setup() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        SizeClasses::from_class_sizes(CLASSES)
            .unwrap()
            .install()
            .unwrap();
    });
}

#[test]
fn test_installed_catalogue_is_global() {
    setup();
    let global = SizeClasses::global();
    let sizes = global.iter().map(|c| c.class_size()).collect::<Vec<_>>();
    assert_eq!(sizes, CLASSES.to_vec());
    assert_eq!(global.small_threshold(), 512 - HEADER_SIZE);
}

#[test]
fn test_second_install_fails() {
    setup();
    let err = SizeClasses::builtin().install().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::AlreadyInitialized));
}

#[test]
fn test_attach_around_installed_threshold() {
    setup();
    let threshold = SizeClasses::global().small_threshold();
    for len in [0, 1, 64 - HEADER_SIZE, 65 - HEADER_SIZE, threshold, threshold + 1, 10_000] {
        let plain = Bytes::from(vec![0x42u8; len]);
        let tagged = attach(&plain, Some(Arc::new(len) as Payload));
        assert_eq!(tagged, plain);
        assert!(is_attached(&tagged));
        assert_eq!(read_as::<usize>(&tagged).as_deref(), Some(&len));

        if len > 2 {
            let sub = slice(&tagged, 1..len - 1);
            assert_eq!(sub.len(), len - 2);
            assert!(read(&sub).is_some());
        }
    }
}
