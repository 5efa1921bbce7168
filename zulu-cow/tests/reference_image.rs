use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;
use zulu_cow::image::MemFile;
use zulu_cow::{BackingStore, StoreConfig};

#[derive(Debug, Clone)]
enum Op {
    Write { offset: u32, data: Vec<u8> },
    Read { offset: u32, len: usize },
    Promote { group_seed: u32 },
}

const MAX_IMAGE_SIZE: u32 = 64 * 1024;
const MAX_OPS: usize = 48;
const MAX_RW_LEN: usize = 6 * 1024;

fn image_size_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![
        // Sector multiples, the common case.
        (1u32..=MAX_IMAGE_SIZE / 512).prop_map(|sectors| sectors * 512),
        // Anything, including a trailing partial sector.
        1u32..=MAX_IMAGE_SIZE,
    ]
}

fn config_strategy() -> impl Strategy<Value = StoreConfig> {
    (
        prop_oneof![Just(1usize), Just(3usize), Just(16usize), Just(1024usize)],
        prop_oneof![Just(7usize), Just(100usize), Just(2048usize)],
        prop_oneof![Just(512u32), Just(500u32), Just(4096u32)],
    )
        .prop_map(|(bitmap, scratch, block)| {
            StoreConfig::default()
                .with_bitmap_capacity(bitmap)
                .with_scratch_size(scratch)
                .with_block_size(block)
        })
}

fn offset_strategy(image_size: u32) -> BoxedStrategy<u32> {
    prop_oneof![
        3 => 0u32..=image_size,
        2 => (0u32..=image_size / 512).prop_map(|lba| lba * 512),
        1 => (0u32..=512).prop_map(move |delta| image_size.saturating_sub(delta)),
    ]
    .boxed()
}

fn op_strategy(image_size: u32) -> BoxedStrategy<Op> {
    let write = offset_strategy(image_size)
        .prop_flat_map(|offset| (Just(offset), prop::collection::vec(any::<u8>(), 0..=MAX_RW_LEN)))
        .prop_map(|(offset, data)| Op::Write { offset, data });
    let read = (offset_strategy(image_size), 0usize..=MAX_RW_LEN)
        .prop_map(|(offset, len)| Op::Read { offset, len });
    let promote = any::<u32>().prop_map(|group_seed| Op::Promote { group_seed });

    prop_oneof![
        5 => write,
        4 => read,
        1 => promote,
    ]
    .boxed()
}

fn scenario_strategy() -> BoxedStrategy<(u32, StoreConfig, Vec<u8>, Vec<Op>)> {
    (image_size_strategy(), config_strategy())
        .prop_flat_map(|(size, config)| {
            (
                Just(size),
                Just(config),
                prop::collection::vec(any::<u8>(), size as usize),
                prop::collection::vec(op_strategy(size), 1..=MAX_OPS),
            )
        })
        .boxed()
}

fn run_scenario(config: StoreConfig, original: Vec<u8>, ops: Vec<Op>) -> TestCaseResult {
    let mut truth = original.clone();
    let mut store = BackingStore::new(
        MemFile::from_vec(original.clone()),
        MemFile::default(),
        config,
    )
    .unwrap();

    for op in ops {
        match op {
            Op::Write { offset, data } => {
                let offset = offset as usize;
                let expected = data.len().min(truth.len().saturating_sub(offset));
                let written = store.write_at(offset as u64, &data).unwrap();

                prop_assert_eq!(written, expected);
                truth[offset..offset + expected].copy_from_slice(&data[..expected]);
            }
            Op::Read { offset, len } => {
                let offset = offset as usize;
                let expected = len.min(truth.len().saturating_sub(offset));
                let mut buf = vec![0; len];
                let read = store.read_at(offset as u64, &mut buf).unwrap();

                prop_assert_eq!(read, expected);
                prop_assert_eq!(&buf[..read], &truth[offset..offset + expected]);
            }
            Op::Promote { group_seed } => {
                let count = store.geometry().group_count();

                if count > 0 {
                    store.promote_group(group_seed as u64 % count).unwrap();
                }
            }
        }

        prop_assert_eq!(store.recreate().unwrap(), truth.clone());
        prop_assert!(store.bitmap().iter_dirty().all(|g| g < store.geometry().group_count()));
    }

    prop_assert_eq!(store.overlay().as_slice().len(), truth.len());
    prop_assert_eq!(store.original().as_slice(), &original[..]);

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    #[test]
    fn store_matches_flat_reference_image(
        (_size, config, original, ops) in scenario_strategy()
    ) {
        run_scenario(config, original, ops)?;
    }
}

#[test]
fn bitmap_stays_within_budget_for_any_size() {
    for size in [512u64, 4096, 1 << 20, 8 << 20, (8 << 20) + 512, 1 << 30] {
        let geometry = zulu_cow::Geometry::new(size, 512, 1024).unwrap();

        assert!(geometry.group_count() <= 8192, "size {size}");
        assert_eq!(
            geometry.bitmap_len() as u64,
            geometry.group_count().div_ceil(8),
            "size {size}"
        );
    }
}
