use linfa::Float;
use ndarray::Array2;

/// A method generating a set of `ns` samples within a given sample space.
///
/// The sample space is defined by `[lower_bound_xi, upper_bound_xi]^nx`
/// within `R^nx` where `nx` is the dimension of the sample space.
pub trait SamplingMethod<F: Float> {
    /// Returns the bounds of the sample space as a (nx, 2) matrix where
    /// the ith row is the `[lower, upper]` interval of the ith component.
    fn sampling_space(&self) -> &Array2<F>;

    /// Generates a (ns, nx)-shaped array of samples belonging to the
    /// `[0., 1.]^nx` hypercube.
    fn normalized_sample(&self, ns: usize) -> Array2<F>;

    /// Generates a (ns, nx)-shaped array of samples belonging to the
    /// sample space returned by `sampling_space`.
    fn sample(&self, ns: usize) -> Array2<F> {
        let xlimits = self.sampling_space();
        let lower = xlimits.column(0);
        let width = &xlimits.column(1) - &lower;
        self.normalized_sample(ns) * width + lower
    }
}
