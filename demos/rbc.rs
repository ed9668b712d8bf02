use equilibria::nalgebra::dvector;
use equilibria::testing::Rbc;
use equilibria::{PathOptions, SteadyStateOptions};

fn main() -> Result<(), String> {
    let mut model = Rbc.model().map_err(|error| format!("{error}"))?;

    let result = model
        .solve_steady_state(&SteadyStateOptions::default())
        .map_err(|error| format!("{error}"))?;

    println!("{}", result.message);
    if !result.success {
        return Err("steady state not found".to_string());
    }

    for (name, value) in result.unknowns.iter().zip(result.solution.iter()) {
        println!("{name} = {value:.6}");
    }

    // Start with half of the steady-state capital.
    let x0 = dvector![result.steady_state[0], 0.5 * result.steady_state[1]];

    let mut options = PathOptions::default();
    options.set_horizon(20).set_lookahead(60);

    let solution = model
        .find_path(&x0, &options)
        .map_err(|error| format!("{error}"))?;

    for (t, xt) in solution.trajectory.iter().enumerate() {
        println!("t = {:>2}\tc = {:.6}\tk = {:.6}", t, xt[0], xt[1]);
    }

    if solution.is_converged() {
        Ok(())
    } else {
        Err(format!("path is not reliable{}", solution.flags))
    }
}
