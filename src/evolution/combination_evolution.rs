use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;

use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info, warn};

use crate::config::GeneticConfig;
use crate::consts::{DEGENERATE_SHARPE, FLOAT_COMPARISON_EPSILON, GENETIC_STREAM};
use crate::error::SelectionError;
use crate::evolution::aggregator::{Aggregator, ArithmeticMean};
use crate::pool::CandidatePool;
use crate::portfolio::{
    compare_sharpe, rank_candidates, Combination, ScoredCombination, SimulationResult,
};
use crate::progress::Phase;
use crate::sampling::{stream_id, stream_rng};
use crate::search::{
    binomial, keep_better, BestTracker, GenerationStats, SearchContext, SearchMethod, SizeOutcome,
    Termination,
};
use crate::simulation::AdaptiveOutcome;

/// One member of the population. `outcome` is `None` until it is simulated.
#[derive(Debug, Clone)]
pub struct Individual {
    pub combination: Combination,
    pub outcome: Option<AdaptiveOutcome>,
}

impl Individual {
    fn unscored(combination: Combination) -> Self {
        Individual {
            combination,
            outcome: None,
        }
    }

    /// Best Sharpe found for the combination; discarded individuals keep
    /// their scan best, so they still compete but rarely win.
    pub fn fitness(&self) -> f64 {
        self.outcome
            .as_ref()
            .map_or(DEGENERATE_SHARPE, |outcome| outcome.score.best_sharpe())
    }
}

/// Evolutionary search for sizes too large to enumerate.
pub struct GeneticAlgorithmSearch<'c, 'a> {
    ctx: &'c SearchContext<'a>,
}

impl<'c, 'a> GeneticAlgorithmSearch<'c, 'a> {
    pub fn new(ctx: &'c SearchContext<'a>) -> Self {
        GeneticAlgorithmSearch { ctx }
    }

    fn params(&self) -> &GeneticConfig {
        &self.ctx.config.genetic
    }

    pub fn run(&self, k: usize, tracker: &mut BestTracker) -> Result<SizeOutcome, SelectionError> {
        let started = Instant::now();
        let pool = self.ctx.pool;
        let params = self.params();
        // Operators share one sequential stream per size; evaluations get
        // their own streams starting at position 1.
        let mut rng = stream_rng(self.ctx.seed, stream_id(GENETIC_STREAM, k, 0));
        let mut next_position: u64 = 1;

        let mut population = self.initialize_population(k, &mut rng)?;
        let population_size = population.len();
        info!(
            k,
            population_size,
            generations = params.num_generations,
            "Genetic search started"
        );

        let mut best: Option<ScoredCombination> = None;
        let mut history: Vec<GenerationStats> = Vec::new();
        let mut best_per_generation: Vec<f64> = Vec::new();
        let mut evaluated: u64 = 0;
        let mut discarded: u64 = 0;
        let mut termination = Termination::MaxGenerations;

        for generation in 0..params.num_generations {
            if self.ctx.cancel.is_cancelled() {
                termination = Termination::Cancelled;
                break;
            }

            // Elites carry their cached outcome, only newcomers are simulated.
            let pending: Vec<(usize, (u64, Combination))> = population
                .iter()
                .enumerate()
                .filter(|(_, individual)| individual.outcome.is_none())
                .map(|(idx, individual)| {
                    let position = next_position;
                    next_position += 1;
                    (idx, (position, individual.combination.clone()))
                })
                .collect();
            let (slots, batch): (Vec<usize>, Vec<(u64, Combination)>) =
                pending.into_iter().unzip();
            let outcomes =
                self.ctx
                    .evaluate_batch(GENETIC_STREAM, k, &batch, tracker.best_sharpe());

            for (idx, outcome) in slots.into_iter().zip(outcomes) {
                evaluated += 1;
                if outcome.is_discarded() {
                    discarded += 1;
                } else {
                    let candidate = ScoredCombination {
                        combination: population[idx].combination.clone(),
                        score: outcome.score.clone(),
                    };
                    tracker.offer(pool, &candidate);
                    keep_better(pool, &mut best, candidate);
                }
                population[idx].outcome = Some(outcome);
            }

            let fitness: Vec<f64> = population.iter().map(Individual::fitness).collect();
            let generation_best = fitness
                .iter()
                .copied()
                .max_by(|a, b| compare_sharpe(*a, *b))
                .unwrap_or(DEGENERATE_SHARPE);
            let finite: Vec<f64> = fitness.iter().copied().filter(|f| f.is_finite()).collect();
            let average = ArithmeticMean.value(&finite).ok();
            history.push(GenerationStats {
                generation,
                best_sharpe: generation_best.is_finite().then_some(generation_best),
                average_sharpe: average,
            });
            best_per_generation.push(generation_best);
            debug!(k, generation, generation_best, ?average, "Generation evaluated");

            self.ctx.report(
                Phase::Genetic,
                Some(k),
                100. * (generation + 1) as f64 / params.num_generations as f64,
                tracker.best_sharpe(),
            );

            if has_converged(
                &best_per_generation,
                params.convergence_generations,
                params.convergence_tolerance,
            ) {
                termination = Termination::Converged;
                break;
            }
            if generation + 1 == params.num_generations {
                break;
            }

            population = self.next_generation(population, k, &mut rng);
        }

        info!(
            k,
            generations_run = history.len(),
            ?termination,
            best_sharpe = best.as_ref().map(|b| b.best_sharpe()),
            "Genetic search finished"
        );
        Ok(SizeOutcome {
            k,
            method: SearchMethod::Genetic,
            termination,
            best,
            total_combinations: binomial(pool.len(), k),
            skipped_invalid: 0,
            evaluated,
            discarded,
            population_size: Some(population_size),
            generations_run: Some(history.len()),
            fitness_history: history,
            skip_reason: None,
            duration: started.elapsed(),
        })
    }

    /// Unique valid individuals first; when the attempt budget runs out the
    /// population is padded with duplicates of what was found.
    pub fn initialize_population(
        &self,
        k: usize,
        rng: &mut ChaCha20Rng,
    ) -> Result<Vec<Individual>, SelectionError> {
        let params = self.params();
        let required = params.population_size;
        let max_attempts = required.saturating_mul(params.seed_attempts_per_individual);

        let mut seen: HashSet<Combination> = HashSet::new();
        let mut unique: Vec<Combination> = Vec::new();
        let mut attempts = 0;
        while unique.len() < required && attempts < max_attempts {
            attempts += 1;
            if let Some(combination) = self.random_valid_combination(k, rng) {
                if seen.insert(combination.clone()) {
                    unique.push(combination);
                }
            }
        }

        if unique.is_empty() {
            return Err(SelectionError::PopulationSeeding {
                k,
                found: 0,
                required,
            });
        }
        if unique.len() < required {
            let shortfall = SelectionError::PopulationSeeding {
                k,
                found: unique.len(),
                required,
            };
            warn!(%shortfall, attempts, "Padding the population with duplicates");
        }

        let found = unique.len();
        Ok((0..required)
            .map(|i| Individual::unscored(unique[i % found].clone()))
            .collect())
    }

    /// Walks a shuffled pool and keeps every security the sector cap allows.
    fn random_valid_combination(&self, k: usize, rng: &mut ChaCha20Rng) -> Option<Combination> {
        let mut order: Vec<usize> = (0..self.ctx.pool.len()).collect();
        order.shuffle(rng);
        let mut picked = Vec::with_capacity(k);
        for idx in order {
            if picked.len() == k {
                break;
            }
            if self.ctx.filter.can_add(&picked, idx) {
                picked.push(idx);
            }
        }
        (picked.len() == k).then(|| Combination::new(picked))
    }

    fn next_generation(
        &self,
        mut population: Vec<Individual>,
        k: usize,
        rng: &mut ChaCha20Rng,
    ) -> Vec<Individual> {
        let pool = self.ctx.pool;
        population.sort_by(|a, b| rank_individuals(pool, b, a));

        let elitism = self.params().elitism_count.min(population.len());
        let mut next: Vec<Individual> = population[..elitism].to_vec();
        let offsprings = self.generate_offsprings(&population, population.len() - elitism, k, rng);
        next.extend(offsprings.into_iter().map(Individual::unscored));
        next
    }

    fn generate_offsprings(
        &self,
        population: &[Individual],
        offspring_count: usize,
        k: usize,
        rng: &mut ChaCha20Rng,
    ) -> Vec<Combination> {
        let params = self.params();
        let mut offsprings = Vec::with_capacity(offspring_count);

        while offsprings.len() < offspring_count {
            let (parent_1, parent_2) = self.select_parents(population, rng);

            let mut child = if rng.gen_bool(params.crossover_rate) {
                self.crossover(parent_1, parent_2, k, rng)
            } else {
                parent_1.clone()
            };
            if rng.gen_bool(params.mutation_rate) {
                child = self.mutate(&child, rng);
            }
            offsprings.push(child);
        }
        offsprings
    }

    fn select_parents<'p>(
        &self,
        population: &'p [Individual],
        rng: &mut ChaCha20Rng,
    ) -> (&'p Combination, &'p Combination) {
        let parent_1 = self.tournament_selection(population, rng);
        let parent_2 = self.tournament_selection(population, rng);
        (parent_1, parent_2)
    }

    fn tournament_selection<'p>(
        &self,
        population: &'p [Individual],
        rng: &mut ChaCha20Rng,
    ) -> &'p Combination {
        let pool = self.ctx.pool;
        let size = self.params().tournament_size.min(population.len()).max(1);
        let winner = population
            .choose_multiple(rng, size)
            .max_by(|a, b| rank_individuals(pool, a, b));
        // population is never empty once seeded
        match winner {
            Some(individual) => &individual.combination,
            None => &population[0].combination,
        }
    }

    /// Single point crossover on the sorted index lists, then repair.
    pub fn crossover(
        &self,
        parent_1: &Combination,
        parent_2: &Combination,
        k: usize,
        rng: &mut ChaCha20Rng,
    ) -> Combination {
        if k < 2 {
            return parent_1.clone();
        }
        let point = rng.gen_range(1..k);
        let genes: Vec<usize> = parent_1.indices()[..point]
            .iter()
            .chain(parent_2.indices()[point..].iter())
            .copied()
            .collect();
        self.repair(genes, k, rng)
    }

    /// Drops duplicates and over-cap genes, then tops up with random
    /// securities the cap still allows.
    pub fn repair(&self, genes: Vec<usize>, k: usize, rng: &mut ChaCha20Rng) -> Combination {
        let filter = &self.ctx.filter;
        let mut kept: Vec<usize> = Vec::with_capacity(k);
        for gene in genes {
            if kept.len() < k && !kept.contains(&gene) && filter.can_add(&kept, gene) {
                kept.push(gene);
            }
        }

        let mut fillers: Vec<usize> = (0..self.ctx.pool.len())
            .filter(|idx| !kept.contains(idx))
            .collect();
        fillers.shuffle(rng);
        for idx in fillers {
            if kept.len() == k {
                break;
            }
            if filter.can_add(&kept, idx) {
                kept.push(idx);
            }
        }
        Combination::new(kept)
    }

    /// Swaps one member for an outsider; gives up (returning the input)
    /// when no valid swap is found within the attempt budget.
    pub fn mutate(&self, combination: &Combination, rng: &mut ChaCha20Rng) -> Combination {
        let pool_size = self.ctx.pool.len();
        if combination.is_empty() || combination.len() >= pool_size {
            return combination.clone();
        }
        let slot = rng.gen_range(0..combination.len());
        let remaining: Vec<usize> = combination
            .indices()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != slot)
            .map(|(_, &idx)| idx)
            .collect();

        for _ in 0..self.params().mutation_attempts {
            let incoming = rng.gen_range(0..pool_size);
            if combination.contains(incoming) {
                continue;
            }
            if self.ctx.filter.can_add(&remaining, incoming) {
                let mut genes = remaining;
                genes.push(incoming);
                return Combination::new(genes);
            }
        }
        combination.clone()
    }
}

fn rank_individuals(pool: &CandidatePool, a: &Individual, b: &Individual) -> Ordering {
    fn best(individual: &Individual) -> Option<&SimulationResult> {
        individual
            .outcome
            .as_ref()
            .and_then(|outcome| outcome.score.best())
    }
    rank_candidates(pool, (&a.combination, best(a)), (&b.combination, best(b)))
}

/// Best fitness improved by less than `tolerance` over the last `window` generations.
fn has_converged(best_per_generation: &[f64], window: usize, tolerance: f64) -> bool {
    let len = best_per_generation.len();
    if window == 0 || len <= window {
        return false;
    }
    let (now, then) = (best_per_generation[len - 1], best_per_generation[len - 1 - window]);
    if !now.is_finite() || !then.is_finite() {
        return false;
    }
    now - then < tolerance.max(FLOAT_COMPARISON_EPSILON)
}
