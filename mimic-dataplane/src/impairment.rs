//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use mimic_utils::bus::DropReason;
use mimic_utils::packet::Packet;
use rand::Rng;
use rand_distr::{Distribution, Normal, Pareto};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Error;

// Upper bound on a scheduled delay release.
pub const DELAY_RELEASE_CAP: Duration = Duration::from_secs(60);

// Delay sampling distribution.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayDistribution {
    #[default]
    Uniform,
    Normal,
    Pareto,
}

// Per-interface link impairment configuration. All percentages are in
// [0, 100]; disabled stages cost nothing.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImpairmentCfg {
    pub loss_pct: f64,
    pub loss_correlation: f64,
    pub corrupt_pct: f64,
    pub duplicate_pct: f64,
    pub delay_ms: u64,
    pub jitter_ms: u64,
    pub distribution: DelayDistribution,
    pub reorder_pct: f64,
    pub reorder_gap: u32,
    pub bandwidth_kbps: u64,
}

// What to do with a packet after one pipeline pass.
#[derive(Debug)]
pub enum ImpairmentAction {
    /// Forward immediately.
    Emit(Packet),
    /// Schedule release at the given instant.
    EmitAt(Packet, Instant),
    /// Discard.
    Drop(DropReason),
}

//
// Link impairment pipeline. Stages are applied in the canonical order:
// loss, corruption, duplication, delay/jitter, reorder, bandwidth limit.
//
#[derive(Debug)]
pub struct Impairment {
    cfg: ImpairmentCfg,
    // Gilbert-Elliott state: whether the previous packet was lost.
    loss_prev: bool,
    // Reorder hold slot and its remaining pass-through count.
    held: Option<(Packet, u32)>,
    // Virtual finish clock of the secondary bandwidth bucket.
    bw_vclock: Option<Instant>,
}

// ===== impl ImpairmentCfg =====

impl ImpairmentCfg {
    pub fn validate(&self) -> Result<(), Error> {
        for (field, value) in [
            ("loss-pct", self.loss_pct),
            ("loss-correlation", self.loss_correlation),
            ("corrupt-pct", self.corrupt_pct),
            ("duplicate-pct", self.duplicate_pct),
            ("reorder-pct", self.reorder_pct),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::InvalidImpairment(
                    field,
                    format!("{value} is outside [0, 100]"),
                ));
            }
        }
        if self.reorder_pct > 0.0 && self.reorder_gap == 0 {
            return Err(Error::InvalidImpairment(
                "reorder-gap",
                "must be greater than zero when reordering".to_owned(),
            ));
        }
        Ok(())
    }

    /// True when every stage is disabled: the pipeline is a byte-for-byte
    /// in-order pass-through.
    pub fn is_pass_through(&self) -> bool {
        self.loss_pct == 0.0
            && self.corrupt_pct == 0.0
            && self.duplicate_pct == 0.0
            && self.delay_ms == 0
            && self.jitter_ms == 0
            && self.reorder_pct == 0.0
            && self.bandwidth_kbps == 0
    }
}

// ===== impl Impairment =====

impl Impairment {
    pub fn new(cfg: ImpairmentCfg) -> Impairment {
        Impairment {
            cfg,
            loss_prev: false,
            held: None,
            bw_vclock: None,
        }
    }

    pub fn cfg(&self) -> &ImpairmentCfg {
        &self.cfg
    }

    /// Runs one packet through the pipeline. A single input may produce
    /// zero, one or several actions (duplication, reorder releases).
    pub fn apply(
        &mut self,
        packet: Packet,
        now: Instant,
        rng: &mut impl Rng,
    ) -> Vec<ImpairmentAction> {
        let mut actions = vec![];

        if self.cfg.is_pass_through() {
            actions.push(ImpairmentAction::Emit(packet));
            return actions;
        }

        // Loss: Gilbert-Elliott two-state chain. The effective drop
        // probability blends the configured rate with the previous
        // outcome by the correlation factor.
        if self.cfg.loss_pct > 0.0 {
            let base = self.cfg.loss_pct / 100.0;
            let rho = self.cfg.loss_correlation / 100.0;
            let prev = if self.loss_prev { 1.0 } else { 0.0 };
            let probability = (1.0 - rho) * base + rho * prev;
            if rng.random::<f64>() < probability {
                self.loss_prev = true;
                self.reorder_pass(now, rng, &mut actions);
                actions.push(ImpairmentAction::Drop(
                    DropReason::ImpairmentLoss,
                ));
                return actions;
            }
            self.loss_prev = false;
        }

        // Corruption: flip one random payload bit and keep forwarding.
        let mut packet = packet;
        if self.cfg.corrupt_pct > 0.0
            && rng.random::<f64>() < self.cfg.corrupt_pct / 100.0
            && packet.payload_bits() > 0
        {
            let bit = rng.random_range(0..packet.payload_bits());
            packet = packet.flip_payload_bit(bit);
        }

        // Duplication: the copy runs through the later stages
        // independently, so the two receive independent delays.
        let duplicate = (self.cfg.duplicate_pct > 0.0
            && rng.random::<f64>() < self.cfg.duplicate_pct / 100.0)
            .then(|| packet.clone());

        self.schedule_stages(packet, now, rng, &mut actions);
        if let Some(duplicate) = duplicate {
            self.schedule_stages(duplicate, now, rng, &mut actions);
        }

        actions
    }

    /// Cancels the reorder hold slot, returning the held packet for an
    /// `InterfaceDown` drop by the caller.
    pub fn flush_held(&mut self) -> Option<Packet> {
        self.held.take().map(|(packet, _)| packet)
    }

    // Delay, reorder and bandwidth stages for one packet.
    fn schedule_stages(
        &mut self,
        packet: Packet,
        now: Instant,
        rng: &mut impl Rng,
        actions: &mut Vec<ImpairmentAction>,
    ) {
        // Reorder: with probability p the packet enters the (single) hold
        // slot and is released after `gap` later packets have passed.
        if self.cfg.reorder_pct > 0.0 && self.held.is_none() {
            if rng.random::<f64>() < self.cfg.reorder_pct / 100.0 {
                self.held = Some((packet, self.cfg.reorder_gap));
                return;
            }
        }

        let release_at = self.release_time(packet.len(), now, rng);
        self.emit(packet, release_at, now, actions);
        self.reorder_pass(now, rng, actions);
    }

    // Counts a pass-through against the held packet, releasing it once
    // `gap` successors have gone by.
    fn reorder_pass(
        &mut self,
        now: Instant,
        rng: &mut impl Rng,
        actions: &mut Vec<ImpairmentAction>,
    ) {
        let Some((packet, remaining)) = self.held.take() else {
            return;
        };
        if remaining > 1 {
            self.held = Some((packet, remaining - 1));
            return;
        }
        let release_at = self.release_time(packet.len(), now, rng);
        self.emit(packet, release_at, now, actions);
    }

    fn emit(
        &mut self,
        packet: Packet,
        release_at: Option<Instant>,
        now: Instant,
        actions: &mut Vec<ImpairmentAction>,
    ) {
        match release_at {
            None => actions.push(ImpairmentAction::Emit(packet)),
            Some(release_at) => {
                if release_at - now > DELAY_RELEASE_CAP {
                    actions.push(ImpairmentAction::Drop(
                        DropReason::DelayOverflow,
                    ));
                } else {
                    actions
                        .push(ImpairmentAction::EmitAt(packet, release_at));
                }
            }
        }
    }

    // Combined delay/jitter and bandwidth release time; `None` means the
    // packet needs no scheduling at all.
    fn release_time(
        &mut self,
        size: usize,
        now: Instant,
        rng: &mut impl Rng,
    ) -> Option<Instant> {
        let mut release_at = None;

        // Delay and jitter.
        if self.cfg.delay_ms > 0 || self.cfg.jitter_ms > 0 {
            let delay = self.sample_delay(rng).max(0.0);
            release_at = Some(now + Duration::from_secs_f64(delay));
        }

        // Secondary bandwidth bucket: a virtual serialization clock at
        // `bandwidth_kbps` with a 100 ms burst allowance. Packets within
        // the burst window pass undelayed; beyond it releases are spaced
        // at line rate.
        if self.cfg.bandwidth_kbps > 0 {
            let rate = self.cfg.bandwidth_kbps as f64 * 1000.0 / 8.0;
            let tx_time = Duration::from_secs_f64(size as f64 / rate);
            let burst = Duration::from_millis(100);

            let earliest = release_at.unwrap_or(now);
            let vclock = self.bw_vclock.unwrap_or(earliest).max(earliest);
            let release = earliest.max(vclock.checked_sub(burst).unwrap_or(earliest));
            self.bw_vclock = Some(vclock + tx_time);
            release_at = Some(release.max(earliest));
        }

        release_at
    }

    // Samples the delay in seconds from the configured distribution.
    fn sample_delay(&self, rng: &mut impl Rng) -> f64 {
        let mean = self.cfg.delay_ms as f64 / 1000.0;
        let jitter = self.cfg.jitter_ms as f64 / 1000.0;
        if jitter == 0.0 {
            return mean;
        }

        match self.cfg.distribution {
            DelayDistribution::Uniform => {
                rng.random_range(mean - jitter..=mean + jitter)
            }
            DelayDistribution::Normal => {
                Normal::new(mean, jitter).unwrap().sample(rng)
            }
            DelayDistribution::Pareto => {
                // Shape chosen so the distribution mean is delay + jitter.
                let scale = mean.max(f64::EPSILON);
                let shape = 1.0 + scale / jitter.max(f64::EPSILON);
                Pareto::new(scale, shape).unwrap().sample(rng)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use mimic_utils::packet::IP_PROTO_UDP;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn packet(seq: u8) -> Packet {
        Packet::build_ipv4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 1, 1),
            IP_PROTO_UDP,
            64,
            0,
            &[seq; 32],
            "eth0",
            Instant::now(),
        )
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(99)
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_pipeline_is_pass_through() {
        let mut impairment = Impairment::new(ImpairmentCfg::default());
        let mut rng = rng();

        for seq in 0..100 {
            let input = packet(seq);
            let input_bytes = input.data().clone();
            let actions =
                impairment.apply(input, Instant::now(), &mut rng);
            assert_eq!(actions.len(), 1);
            let ImpairmentAction::Emit(output) = &actions[0] else {
                panic!("expected immediate emission");
            };
            // Byte-for-byte identical, in order.
            assert_eq!(output.data(), &input_bytes);
            assert_eq!(output.data()[27], seq);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loss_boundaries() {
        let mut rng = rng();

        let mut all = Impairment::new(ImpairmentCfg {
            loss_pct: 100.0,
            ..Default::default()
        });
        let mut none = Impairment::new(ImpairmentCfg {
            loss_pct: 0.0,
            delay_ms: 1,
            ..Default::default()
        });

        for seq in 0..100 {
            let actions = all.apply(packet(seq), Instant::now(), &mut rng);
            assert!(matches!(
                actions.as_slice(),
                [ImpairmentAction::Drop(DropReason::ImpairmentLoss)]
            ));

            let actions =
                none.apply(packet(seq), Instant::now(), &mut rng);
            assert!(matches!(
                actions.as_slice(),
                [ImpairmentAction::EmitAt(..)]
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_is_monotone_and_exact() {
        let mut impairment = Impairment::new(ImpairmentCfg {
            delay_ms: 100,
            ..Default::default()
        });
        let mut rng = rng();

        let now = Instant::now();
        let actions = impairment.apply(packet(1), now, &mut rng);
        let [ImpairmentAction::EmitAt(_, at)] = actions.as_slice() else {
            panic!("expected scheduled release");
        };
        assert_eq!(*at - now, Duration::from_millis(100));

        // A larger configured delay never releases earlier.
        let mut slower = Impairment::new(ImpairmentCfg {
            delay_ms: 200,
            ..Default::default()
        });
        let actions = slower.apply(packet(2), now, &mut rng);
        let [ImpairmentAction::EmitAt(_, slower_at)] = actions.as_slice()
        else {
            panic!("expected scheduled release");
        };
        assert!(*slower_at >= *at);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_overflow_drops() {
        let mut impairment = Impairment::new(ImpairmentCfg {
            delay_ms: 61_000,
            ..Default::default()
        });
        let mut rng = rng();

        let actions =
            impairment.apply(packet(1), Instant::now(), &mut rng);
        assert!(matches!(
            actions.as_slice(),
            [ImpairmentAction::Drop(DropReason::DelayOverflow)]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_share_payload() {
        let mut impairment = Impairment::new(ImpairmentCfg {
            duplicate_pct: 100.0,
            delay_ms: 10,
            jitter_ms: 5,
            ..Default::default()
        });
        let mut rng = rng();

        let actions =
            impairment.apply(packet(7), Instant::now(), &mut rng);
        let packets = actions
            .iter()
            .filter_map(|action| match action {
                ImpairmentAction::Emit(packet)
                | ImpairmentAction::EmitAt(packet, _) => Some(packet),
                ImpairmentAction::Drop(_) => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].data(), packets[1].data());
    }

    #[tokio::test(start_paused = true)]
    async fn reorder_holds_for_gap_successors() {
        let mut impairment = Impairment::new(ImpairmentCfg {
            reorder_pct: 100.0,
            reorder_gap: 3,
            ..Default::default()
        });
        let mut rng = rng();

        // Packets #1..#10. The hold slot takes #1; #2..#4 pass and then
        // release it, #5 is held next, and so on.
        let mut out = vec![];
        for seq in 1..=10 {
            for action in
                impairment.apply(packet(seq), Instant::now(), &mut rng)
            {
                if let ImpairmentAction::Emit(packet) = action {
                    out.push(packet.data()[27]);
                }
            }
        }
        assert_eq!(out, vec![2, 3, 4, 1, 6, 7, 8, 5, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn bandwidth_limit_spaces_releases() {
        // 80 kbit/s: a 52-byte packet serializes in 5.2 ms, so the
        // 100 ms burst covers roughly the first 19 packets.
        let mut impairment = Impairment::new(ImpairmentCfg {
            bandwidth_kbps: 80,
            ..Default::default()
        });
        let mut rng = rng();

        let now = Instant::now();
        let at = |actions: &[ImpairmentAction]| match &actions[0] {
            ImpairmentAction::EmitAt(_, at) => *at,
            ImpairmentAction::Emit(_) => now,
            ImpairmentAction::Drop(_) => panic!("unexpected drop"),
        };

        let mut releases = vec![];
        for seq in 0..40 {
            let actions = impairment.apply(packet(seq), now, &mut rng);
            releases.push(at(&actions));
        }

        // Within the burst window packets pass undelayed...
        assert_eq!(releases[0], now);
        assert_eq!(releases[10], now);
        // ...and beyond it releases are spaced at line rate, in order.
        assert!(releases.windows(2).all(|pair| pair[0] <= pair[1]));
        let last = *releases.last().unwrap();
        assert!(last > now + Duration::from_millis(100));
    }
}
