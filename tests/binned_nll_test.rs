use std::sync::Arc;

use approx::assert_abs_diff_eq;
use binfit::data::{BoxCut, LineCut, OwnedDataSet, Side};
use binfit::histogram::{AxisCollection, BinAxis, BinnedDistribution};
use binfit::parameters::{FitComponent, ParameterDict};
use binfit::systematics::Shift;
use binfit::templates::NormFittingStatus;
use binfit::teststat::{BinnedNll, ChiSquare, TestStatistic};
use binfit::FitError;

fn unit_axis() -> BinAxis {
    BinAxis::new("energy", 0.0, 10.0, 10)
}

fn dist(name: &str, contents: Vec<f64>) -> BinnedDistribution {
    let mut axes = AxisCollection::new();
    axes.add_axis(BinAxis::new("energy", 0.0, contents.len() as f64, contents.len()))
        .unwrap();
    let mut d = BinnedDistribution::new(name, axes);
    d.set_contents(contents).unwrap();
    d
}

fn params(pairs: &[(&str, f64)]) -> ParameterDict {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Poisson NLL without constant terms.
fn poisson_nll(expected: &[f64], observed: &[f64]) -> f64 {
    expected
        .iter()
        .zip(observed)
        .map(|(&mu, &n)| if n == 0.0 { mu } else { mu - n * mu.ln() })
        .sum()
}

#[test]
fn nll_is_lowest_at_the_true_scale() {
    let template = dist("signal", (1..=10).map(f64::from).collect());
    let mut data = template.clone();
    data.scale(2.0);

    let mut nll = BinnedNll::new();
    nll.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    nll.set_data_dist(&data);

    let at = |nll: &mut BinnedNll, norm: f64| nll.evaluate_at(&params(&[("signal_norm", norm)])).unwrap();
    let best = at(&mut nll, 2.0);
    assert!(best < at(&mut nll, 1.0));
    assert!(best < at(&mut nll, 5.0));
    assert!(best < at(&mut nll, 1.9));
    assert!(best < at(&mut nll, 2.1));
}

#[test]
fn barlow_beeston_with_huge_rates_matches_plain_likelihood() {
    let signal = dist("signal", vec![5.0, 10.0, 20.0, 10.0, 5.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
    let background = dist("background", vec![3.0; 10]);
    let data = dist("data", vec![9.0, 11.0, 25.0, 12.0, 7.0, 4.0, 5.0, 3.0, 2.0, 6.0]);
    let point = params(&[("signal_norm", 1.2), ("background_norm", 0.9)]);

    let mut plain = BinnedNll::new();
    plain
        .add_templates(&[signal.clone(), background.clone()], &[&[], &[]], None)
        .unwrap();
    plain.set_data_dist(&data);

    let mut bb = BinnedNll::new();
    bb.add_templates_with_rates(
        &[signal, background],
        &[&[], &[]],
        &[1_000_000_000_000, 1_000_000_000_000],
        None,
    )
    .unwrap();
    bb.set_barlow_beeston(true).unwrap();
    bb.set_data_dist(&data);

    let expected = plain.evaluate_at(&point).unwrap();
    let corrected = bb.evaluate_at(&point).unwrap();
    assert_abs_diff_eq!(corrected, expected, epsilon = 1e-6);

    // finite template statistics let the expectation move towards the data
    let mut small = BinnedNll::new();
    small
        .add_template_with_rate(&dist("signal", vec![10.0; 10]), &[], 10, NormFittingStatus::Direct)
        .unwrap();
    small.set_barlow_beeston(true).unwrap();
    small.set_data_dist(&dist("data", vec![15.0; 10]));
    let mut uncorrected = BinnedNll::new();
    uncorrected
        .add_template(&dist("signal", vec![10.0; 10]), &[], NormFittingStatus::Direct)
        .unwrap();
    uncorrected.set_data_dist(&dist("data", vec![15.0; 10]));
    assert!(small.evaluate().unwrap() < uncorrected.evaluate().unwrap());
}

#[test]
fn nll_matches_hand_computation() {
    let template = dist("signal", vec![1.0, 2.0, 3.0, 4.0]);
    let data = dist("data", vec![0.0, 3.0, 2.0, 6.0]);
    let mut nll = BinnedNll::new();
    nll.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    nll.set_data_dist(&data);

    let value = nll.evaluate_at(&params(&[("signal_norm", 1.5)])).unwrap();
    let expected = poisson_nll(&[1.5, 3.0, 4.5, 6.0], &[0.0, 3.0, 2.0, 6.0]);
    assert_abs_diff_eq!(value, expected, epsilon = 1e-12);

    nll.set_constraint("signal_norm", 1.0, 0.25).unwrap();
    let constrained = nll.evaluate().unwrap();
    assert_abs_diff_eq!(constrained, expected + 0.5 * 4.0, epsilon = 1e-12);
}

#[test]
fn negative_discriminant_is_a_statistical_failure() {
    let template = dist("signal", vec![1.0]);
    let data = dist("data", vec![-5.0]);
    let mut nll = BinnedNll::new();
    nll.add_template_with_rate(&template, &[], 1, NormFittingStatus::Direct)
        .unwrap();
    nll.set_barlow_beeston(true).unwrap();
    nll.set_data_dist(&data);

    let err = nll.evaluate().unwrap_err();
    assert!(err.is_statistical(), "{err}");
    assert!(err.to_string().contains("bin 0"));
}

#[test]
fn empty_expected_bin_is_a_statistical_failure() {
    let template = dist("signal", vec![1.0, 0.0, 1.0]);
    let data = dist("data", vec![1.0, 1.0, 1.0]);
    let mut nll = BinnedNll::new();
    nll.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    nll.set_data_dist(&data);
    assert!(matches!(nll.evaluate(), Err(FitError::Statistical(_))));

    let mut chi2 = ChiSquare::new();
    chi2.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    chi2.set_data_dist(&data);
    assert!(matches!(chi2.evaluate(), Err(FitError::Statistical(_))));
}

#[test]
fn registration_errors() {
    let template = dist("a", vec![1.0; 4]);
    let other = dist("b", vec![1.0; 4]);

    let mut nll = BinnedNll::new();
    nll.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    // a rate now would leave the first template without one
    assert!(matches!(
        nll.add_template_with_rate(&other, &[], 100, NormFittingStatus::Direct),
        Err(FitError::Dimension(_))
    ));
    assert!(matches!(
        nll.set_barlow_beeston(true),
        Err(FitError::Configuration(_))
    ));
    // a second template with the same name collides
    assert!(matches!(
        nll.add_template(&template, &[], NormFittingStatus::Direct),
        Err(FitError::Configuration(_))
    ));

    let mut rated = BinnedNll::new();
    assert!(matches!(
        rated.add_template_with_rate(&template, &[], 0, NormFittingStatus::Direct),
        Err(FitError::Configuration(_))
    ));
    rated
        .add_template_with_rate(&template, &[], 100, NormFittingStatus::Direct)
        .unwrap();
    assert!(matches!(
        rated.add_template(&other, &[], NormFittingStatus::Direct),
        Err(FitError::Dimension(_))
    ));
    rated.set_barlow_beeston(true).unwrap();
    assert!(rated.barlow_beeston());
    assert_eq!(rated.generated_rates(), &[100]);

    let mut bulk = BinnedNll::new();
    assert!(matches!(
        bulk.add_templates(&[template.clone(), other.clone()], &[&[]], None),
        Err(FitError::Dimension(_))
    ));
    assert!(matches!(
        bulk.add_templates_with_rates(&[template, other], &[&[], &[]], &[10], None),
        Err(FitError::Dimension(_))
    ));

    let mut unknown = BinnedNll::new();
    unknown
        .add_template(&dist("a", vec![1.0; 4]), &[], NormFittingStatus::Direct)
        .unwrap();
    assert!(matches!(
        unknown.set_parameters(&params(&[("nope", 1.0)])),
        Err(FitError::Parameter(_))
    ));
    assert!(matches!(unknown.evaluate(), Err(FitError::Logic(_))));
}

#[test]
fn fitting_statuses_control_exposed_parameters() {
    let mut nll = BinnedNll::new();
    nll.add_templates(
        &[dist("a", vec![1.0; 4]), dist("b", vec![1.0; 4]), dist("c", vec![1.0; 4])],
        &[&[], &[], &[]],
        Some(&[
            NormFittingStatus::Direct,
            NormFittingStatus::Fixed,
            NormFittingStatus::Indirect,
        ]),
    )
    .unwrap();
    let names: Vec<String> = nll.parameter_names().unwrap().into_iter().collect();
    assert_eq!(names, vec!["a_norm".to_string()]);
    assert_eq!(nll.parameter_count().unwrap(), 1);

    nll.set_normalisations(&[2.0, 3.0, 4.0]).unwrap();
    assert_eq!(nll.parameters().unwrap()["a_norm"], 2.0);
    assert!(nll.set_normalisations(&[1.0]).is_err());
}

#[test]
fn buffers_truncate_or_fold_edge_bins() {
    let contents: Vec<f64> = (1..=10).map(f64::from).collect();
    let template = dist("signal", contents.clone());
    let data = template.clone();
    let unit = params(&[("signal_norm", 1.0)]);

    let mut truncated = BinnedNll::new();
    truncated
        .add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    truncated.set_buffer("energy", 1, 1);
    truncated.set_data_dist(&data);
    let value = truncated.evaluate_at(&unit).unwrap();
    let kept = &contents[1..9];
    assert_abs_diff_eq!(value, poisson_nll(kept, kept), epsilon = 1e-9);
    assert_eq!(truncated.data_dist().unwrap().n_bins(), 8);
    assert_eq!(truncated.buffer("energy"), (1, 1));

    let mut folded = BinnedNll::new();
    folded
        .add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    folded.set_buffer("energy", 1, 1);
    folded.set_buffer_as_overflow(true);
    folded.set_data_dist(&data);
    let value = folded.evaluate_at(&unit).unwrap();
    let merged = [3.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 19.0];
    assert_abs_diff_eq!(value, poisson_nll(&merged, &merged), epsilon = 1e-9);
    assert_abs_diff_eq!(folded.data_dist().unwrap().integral(), 55.0);
}

#[test]
fn data_set_is_binned_after_cuts() {
    let mut events = OwnedDataSet::new(&["energy", "radius"]);
    for (e, r) in [
        (0.5, 100.0),
        (1.5, 200.0),
        (2.5, 5500.0),
        (3.5, 300.0),
        (7.5, 400.0),
        (12.0, 100.0),
    ] {
        events.add_entry(&[e, r]).unwrap();
    }

    let mut axes = AxisCollection::new();
    axes.add_axis(unit_axis()).unwrap();
    let mut template = BinnedDistribution::new("signal", axes);
    template.set_contents(vec![1.0; 10]).unwrap();

    let mut nll = BinnedNll::new();
    nll.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    nll.add_cut(Box::new(LineCut::new("fiducial", "radius", 5000.0, Side::Below)));
    nll.add_cut(Box::new(BoxCut::new("low_energy", "energy", 0.0, 5.0)));
    nll.set_data_set(Arc::new(events));

    // unit expectation everywhere: each bin contributes mu - n ln 1 = 1
    let value = nll.evaluate().unwrap();
    assert_abs_diff_eq!(value, 10.0, epsilon = 1e-12);

    let log = nll.cut_log().unwrap();
    assert_eq!(log.total(), 6);
    assert_eq!(log.removed_by("fiducial"), Some(1));
    assert_eq!(log.removed_by("low_energy"), Some(2));
    assert_eq!(log.remaining(), 3);
    assert_abs_diff_eq!(nll.data_dist().unwrap().integral(), 3.0);
}

#[test]
fn shift_systematic_recovers_displaced_data() {
    let template = dist("signal", vec![1.0, 1.0, 6.0, 11.0, 6.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
    let data = dist("data", vec![0.0, 1.0, 1.0, 6.0, 11.0, 6.0, 1.0, 1.0, 1.0, 1.0]);

    let mut nll = BinnedNll::new();
    nll.add_template(&template, &["detector"], NormFittingStatus::Direct)
        .unwrap();
    nll.add_systematic_to_group(Box::new(Shift::new("escale", unit_axis())), "detector")
        .unwrap();
    nll.assign_systematic_group("escale", "")
        .unwrap();
    nll.set_buffer("energy", 1, 1);
    nll.set_data_dist(&data);

    // registered once despite sitting in two groups
    assert_eq!(nll.parameter_count().unwrap(), 2);

    let at = |nll: &mut BinnedNll, shift: f64| {
        nll.evaluate_at(&params(&[("signal_norm", 1.0), ("escale_shift", shift)]))
            .unwrap()
    };
    let aligned = at(&mut nll, 1.0);
    assert!(aligned < at(&mut nll, 0.0));
    assert!(aligned < at(&mut nll, 0.5));
    let kept = [1.0, 1.0, 6.0, 11.0, 6.0, 1.0, 1.0, 1.0];
    assert_abs_diff_eq!(aligned, poisson_nll(&kept, &kept), epsilon = 1e-9);
}

#[test]
fn chi_square_of_a_perfect_match_is_zero() {
    let template = dist("signal", vec![4.0, 9.0, 16.0]);
    let data = dist("data", vec![8.0, 18.0, 32.0]);
    let mut chi2 = ChiSquare::new();
    chi2.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    chi2.set_data_dist(&data);
    assert_abs_diff_eq!(chi2.evaluate_at(&params(&[("signal_norm", 2.0)])).unwrap(), 0.0);
    // (8-4)^2/4 + (18-9)^2/9 + (32-16)^2/16
    assert_abs_diff_eq!(
        chi2.evaluate_at(&params(&[("signal_norm", 1.0)])).unwrap(),
        4.0 + 9.0 + 16.0,
        epsilon = 1e-12
    );
}

#[test]
fn failed_additions_leave_the_engine_unchanged() {
    let template = dist("a", vec![1.0; 4]);
    let data = template.clone();
    let axis = BinAxis::new("energy", 0.0, 4.0, 4);

    let mut nll = BinnedNll::new();
    nll.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    nll.set_data_dist(&data);

    // a systematic whose parameter collides with a normalisation
    let mut clash = Shift::new("s", axis.clone());
    clash.rename_parameter("s_shift", "a_norm").unwrap();
    clash.set_parameter("a_norm", 3.0).unwrap();
    assert!(matches!(
        nll.add_systematic(Box::new(clash)),
        Err(FitError::Configuration(_))
    ));
    assert_eq!(nll.systematics().len(), 0);
    assert!(nll.systematics().groups().is_empty());
    assert_eq!(nll.parameter_names().unwrap().len(), 1);
    let value = nll.evaluate_at(&params(&[("a_norm", 1.0)])).unwrap();
    assert_abs_diff_eq!(value, poisson_nll(&[1.0; 4], &[1.0; 4]), epsilon = 1e-12);

    // the same name is free again
    nll.add_systematic_to_group(Box::new(Shift::new("s", axis.clone())), "detector")
        .unwrap();
    assert_eq!(nll.systematics().len(), 1);
    assert!(nll.parameter_names().unwrap().contains("s_shift"));

    // a template whose normalisation collides with a systematic parameter
    let mut grab = Shift::new("g", axis);
    grab.rename_parameter("g_shift", "b_norm").unwrap();
    nll.add_systematic(Box::new(grab)).unwrap();
    assert!(matches!(
        nll.add_template(&dist("b", vec![1.0; 4]), &["detector"], NormFittingStatus::Direct),
        Err(FitError::Configuration(_))
    ));
    assert_eq!(nll.templates().n_templates(), 1);
    assert_eq!(nll.systematics().n_templates(), 1);
    assert!(nll
        .evaluate_at(&params(&[("a_norm", 1.0), ("s_shift", 0.0), ("b_norm", 0.0)]))
        .is_ok());

    let mut chi2 = ChiSquare::new();
    chi2.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    chi2.set_data_dist(&data);
    let mut clash = Shift::new("s", BinAxis::new("energy", 0.0, 4.0, 4));
    clash.rename_parameter("s_shift", "a_norm").unwrap();
    assert!(chi2.add_systematic(Box::new(clash)).is_err());
    assert_abs_diff_eq!(chi2.evaluate_at(&params(&[("a_norm", 1.0)])).unwrap(), 0.0);
}

#[test]
fn parameters_are_read_and_renamed_by_name() {
    let signal = dist("signal", vec![2.0, 4.0, 6.0]);
    let background = dist("background", vec![1.0; 3]);
    let mut data = signal.clone();
    data.scale(2.0);

    let mut nll = BinnedNll::new();
    nll.add_template(&signal, &[], NormFittingStatus::Direct)
        .unwrap();
    nll.add_template(&background, &[], NormFittingStatus::Fixed)
        .unwrap();
    nll.add_systematic(Box::new(Shift::new("offset", BinAxis::new("energy", 0.0, 3.0, 3))))
        .unwrap();
    nll.set_data_dist(&data);

    nll.rename_parameter("signal_norm", "mu").unwrap();
    nll.rename_parameter("offset_shift", "delta").unwrap();
    let names: Vec<String> = nll.parameter_names().unwrap().into_iter().collect();
    assert_eq!(names, ["delta", "mu"]);

    let value = nll
        .evaluate_at(&params(&[("mu", 2.0), ("delta", 0.0)]))
        .unwrap();
    assert_abs_diff_eq!(nll.parameter("mu").unwrap(), 2.0);
    assert_abs_diff_eq!(
        value,
        poisson_nll(&[5.0, 9.0, 13.0], &[4.0, 8.0, 12.0]),
        epsilon = 1e-12
    );

    assert!(matches!(
        nll.parameter("signal_norm"),
        Err(FitError::Parameter(_))
    ));
    assert!(matches!(
        nll.rename_parameter("mu", "delta"),
        Err(FitError::Parameter(_))
    ));
    // fixed normalisations are not parameters
    assert!(matches!(
        nll.rename_parameter("background_norm", "b"),
        Err(FitError::Parameter(_))
    ));
    assert!(matches!(
        nll.set_parameters(&params(&[("signal_norm", 1.0)])),
        Err(FitError::Parameter(_))
    ));
}

#[test]
fn template_without_the_data_observable_is_a_dimension_error() {
    let template = dist("signal", vec![1.0; 4]);
    let mut axes = AxisCollection::new();
    axes.add_axis(BinAxis::new("radius", 0.0, 4.0, 4)).unwrap();
    let mut data = BinnedDistribution::new("data", axes);
    data.set_contents(vec![1.0; 4]).unwrap();

    let mut nll = BinnedNll::new();
    nll.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    nll.set_data_dist(&data);
    assert!(matches!(nll.evaluate(), Err(FitError::Dimension(_))));

    let mut chi2 = ChiSquare::new();
    chi2.add_template(&template, &[], NormFittingStatus::Direct)
        .unwrap();
    chi2.set_data_dist(&data);
    assert!(matches!(chi2.evaluate(), Err(FitError::Dimension(_))));
}
