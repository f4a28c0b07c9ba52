use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use retrace_canon::InferenceModule;
use retrace_core::internal::*;

/// Random inputs matching the module's declared inputs. All dims must be
/// known.
pub fn random_inputs(module: &InferenceModule, seed: u64) -> RetraceResult<TVec<Tensor>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    module
        .input_facts()?
        .iter()
        .enumerate()
        .map(|(ix, fact)| -> RetraceResult<Tensor> {
            let shape = fact.concrete_shape().with_context(|| {
                format!("Input #{ix} has shape {fact}, declare it with inputshape=")
            })?;
            Ok(Tensor::from_shape_simple_fn(&*shape, || rng.gen_range(-1.0f32..1.0)))
        })
        .collect()
}

/// Outputs must be equal bit for bit.
pub fn compare_outputs(expected: &[Tensor], found: &[Tensor]) -> RetraceResult<()> {
    ensure!(
        expected.len() == found.len(),
        "Trace computes {} outputs, module computes {}",
        expected.len(),
        found.len()
    );
    for (ix, (e, f)) in expected.iter().zip(found.iter()).enumerate() {
        ensure!(
            e.shape() == f.shape(),
            "Output #{} shape: trace gives {:?}, module gives {:?}",
            ix,
            e.shape(),
            f.shape()
        );
        if let Some((pos, (a, b))) =
            e.iter().zip(f.iter()).enumerate().find(|(_, (a, b))| a.to_bits() != b.to_bits())
        {
            bail!(
                "Output #{} differs at flat index {}: trace gives {:?}, module gives {:?}",
                ix,
                pos,
                a,
                b
            );
        }
    }
    Ok(())
}

/// Run the traced program and the converted module on the same seeded
/// random inputs.
pub fn check(traced: &Graph, module: &InferenceModule, seed: u64) -> RetraceResult<()> {
    let inputs = random_inputs(module, seed)?;
    let expected = SimplePlan::new(traced)?.run(inputs.clone()).context("Running trace")?;
    let found = module.run(inputs).context("Running module")?;
    compare_outputs(&expected, &found)?;
    info!("Check passed: {} output(s) bit-identical with seed {}", found.len(), seed);
    Ok(())
}
