use subscrub::region::{DetectedBox, Region, RegionMatcher, RegionSet};

/// Four vertically stacked subtitle regions sharing the x-range 108..972,
/// taken from a real multi-region submission.
fn stacked_regions() -> RegionSet {
    RegionSet::from_corner_list(&[
        [108, 96, 972, 249],
        [108, 384, 972, 537],
        [108, 1632, 972, 1785],
        [108, 1785, 972, 1938],
    ])
    .expect("fixture regions")
}

fn boxed(y_min: u32, y_max: u32, x_min: u32, x_max: u32) -> DetectedBox {
    DetectedBox {
        y_min,
        y_max,
        x_min,
        x_max,
        text: "subtitle".to_string(),
        confidence: 0.9,
    }
}

#[test]
fn box_inside_second_region_matches() {
    let matcher = RegionMatcher::default();
    assert!(matcher.matches(&stacked_regions(), &boxed(374, 450, 200, 800)));
}

#[test]
fn box_in_gap_between_regions_does_not_match() {
    let matcher = RegionMatcher::default();
    // The gap between the second and third regions must stay untouched.
    assert!(!matcher.matches(&stacked_regions(), &boxed(900, 1000, 200, 800)));
}

#[test]
fn bounding_union_would_wrongly_accept_gap_box() {
    let matcher = RegionMatcher::default();
    let gap_box = boxed(900, 1000, 200, 800);

    // The naive merged rectangle spanning all four regions covers the gap,
    // so it accepts the gap box.
    let union = RegionSet::new(vec![Region::new(96, 1938, 108, 972).expect("union")]);
    assert!(matcher.matches(&union, &gap_box));

    // The per-region check rejects it.
    assert!(!matcher.matches(&stacked_regions(), &gap_box));
}

#[test]
fn empty_region_set_accepts_everything() {
    let matcher = RegionMatcher::default();
    let empty = RegionSet::empty();
    assert!(matcher.matches(&empty, &boxed(0, 10, 0, 10)));
    assert!(matcher.matches(&empty, &boxed(5000, 6000, 5000, 6000)));
}

#[test]
fn box_straddling_adjacent_regions_matches() {
    let matcher = RegionMatcher::default();
    // Straddles the shared 1785 boundary of the third and fourth regions.
    assert!(matcher.matches(&stacked_regions(), &boxed(1750, 1830, 200, 800)));
}

#[test]
fn fractional_overlap_threshold_applies_per_region() {
    let regions = stacked_regions();
    // Box hanging below the second region: rows 500..600, of which 37 of
    // 100 fall inside the region (537 - 500).
    let hanging = boxed(500, 600, 200, 800);

    assert!(RegionMatcher::new(0.3).matches(&regions, &hanging));
    assert!(!RegionMatcher::new(0.5).matches(&regions, &hanging));
}

#[test]
fn center_point_policy_ignores_small_edge_overlap() {
    // Center at y=595 sits outside the second region even though the top
    // edge overlaps it.
    let matcher = RegionMatcher::default();
    assert!(!matcher.matches(&stacked_regions(), &boxed(530, 660, 200, 800)));
}

#[test]
fn corner_form_normalizes_swapped_corners() {
    let region = Region::from_corners(972, 249, 108, 96).expect("swapped corners");
    assert_eq!(region.y_min, 96);
    assert_eq!(region.y_max, 249);
    assert_eq!(region.x_min, 108);
    assert_eq!(region.x_max, 972);
}

#[test]
fn degenerate_region_rejected() {
    let err = RegionSet::from_corner_list(&[[108, 96, 108, 249]])
        .expect_err("zero-width region should fail");
    assert_eq!(err.kind(), "validation");

    let err = Region::from_corners(-1, 0, 10, 10).expect_err("negative corner should fail");
    assert_eq!(err.kind(), "validation");
}

#[test]
fn matcher_short_circuits_on_first_hit() {
    // Matching a box in the first region of a large set must not depend on
    // later regions being well-formed for the result.
    let mut corners = vec![[108, 96, 972, 249]];
    for i in 0..100 {
        let base = 3000 + i * 10;
        corners.push([108, base, 972, base + 5]);
    }
    let regions = RegionSet::from_corner_list(&corners).expect("many regions");
    let matcher = RegionMatcher::default();
    assert!(matcher.matches(&regions, &boxed(100, 200, 200, 800)));
}
