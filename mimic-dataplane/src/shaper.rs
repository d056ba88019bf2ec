//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mimic_utils::bus::DropReason;
use mimic_utils::packet::Packet;
use mimic_utils::qos::QosClass;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Error;

// Default bounded queue length, in packets.
pub const DEFAULT_QUEUE_LIMIT: usize = 1_000;

// EWMA weight used by random early detection (1/512).
const RED_EWMA_WEIGHT: f64 = 1.0 / 512.0;

// Shaping algorithm selection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShaperAlgorithm {
    #[default]
    TokenBucket,
    WeightedFair,
    StrictPriority,
}

// Egress shaping configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShaperCfg {
    pub algorithm: ShaperAlgorithm,
    pub rate_bps: u64,
    pub burst_bytes: u64,
    pub queue_limit: usize,
    // Per-class WFQ weights, lowest class first.
    pub class_weights: [u32; QosClass::COUNT],
    pub red: Option<RedCfg>,
}

#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RedCfg {
    pub min_threshold: usize,
    pub max_threshold: usize,
    pub max_probability: f64,
}

impl Default for ShaperCfg {
    fn default() -> ShaperCfg {
        ShaperCfg {
            algorithm: ShaperAlgorithm::TokenBucket,
            rate_bps: 1_000_000,
            burst_bytes: 10_000,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            class_weights: [1, 1, 2, 4, 8, 16, 32, 64],
            red: None,
        }
    }
}

// Per-shaper counters, sampled by the observability task.
#[derive(Debug, Default)]
pub struct ShaperStats {
    pub packets_processed: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub packets_delayed: AtomicU64,
    pub bytes_processed: AtomicU64,
    pub bytes_dropped: AtomicU64,
    pub per_class_processed: [AtomicU64; QosClass::COUNT],
    pub per_class_dropped: [AtomicU64; QosClass::COUNT],
}

// Dequeue outcome.
#[derive(Debug)]
pub enum Dequeue {
    /// A packet is released.
    Packet(Packet),
    /// Tokens are insufficient; retry after the duration.
    Wait(Duration),
    /// Nothing queued.
    Empty,
}

//
// Egress shaper: a per-interface gate releasing packets at the configured
// rate, with a selectable scheduling discipline.
//
#[derive(Debug)]
pub struct Shaper {
    cfg: ShaperCfg,
    // Aggregate token bucket; tokens are bytes. Refill is computed from
    // elapsed time on each dequeue attempt.
    tokens: f64,
    last_refill: Instant,
    kind: Kind,
    red_avg: f64,
    pub stats: Arc<ShaperStats>,
}

#[derive(Debug)]
enum Kind {
    // Single bounded FIFO.
    Fifo(VecDeque<Packet>),
    // Per-class FIFOs with virtual finish times.
    WeightedFair {
        queues: [VecDeque<(f64, Packet)>; QosClass::COUNT],
        virtual_time: f64,
        last_finish: [f64; QosClass::COUNT],
    },
    // Per-class FIFOs, highest non-empty class served first. Starvation
    // of lower classes is accepted.
    StrictPriority([VecDeque<Packet>; QosClass::COUNT]),
}

// ===== impl ShaperCfg =====

impl ShaperCfg {
    pub fn validate(&self) -> Result<(), Error> {
        if self.queue_limit == 0 {
            return Err(Error::InvalidShaper(
                "queue-limit",
                "must be greater than zero".to_owned(),
            ));
        }
        if self.algorithm == ShaperAlgorithm::WeightedFair
            && self.class_weights.iter().any(|weight| *weight == 0)
        {
            return Err(Error::InvalidShaper(
                "class-weights",
                "weights must be greater than zero".to_owned(),
            ));
        }
        if let Some(red) = &self.red {
            if red.min_threshold >= red.max_threshold {
                return Err(Error::InvalidShaper(
                    "red",
                    "min-threshold must be below max-threshold".to_owned(),
                ));
            }
            if !(0.0..=1.0).contains(&red.max_probability) {
                return Err(Error::InvalidShaper(
                    "red",
                    "max-probability must be within [0, 1]".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

// ===== impl Shaper =====

impl Shaper {
    pub fn new(cfg: ShaperCfg, now: Instant) -> Shaper {
        let kind = match cfg.algorithm {
            ShaperAlgorithm::TokenBucket => Kind::Fifo(VecDeque::new()),
            ShaperAlgorithm::WeightedFair => Kind::WeightedFair {
                queues: Default::default(),
                virtual_time: 0.0,
                last_finish: [0.0; QosClass::COUNT],
            },
            ShaperAlgorithm::StrictPriority => {
                Kind::StrictPriority(Default::default())
            }
        };
        Shaper {
            tokens: cfg.burst_bytes as f64,
            last_refill: now,
            kind,
            red_avg: 0.0,
            stats: Default::default(),
            cfg,
        }
    }

    /// Number of packets currently queued.
    pub fn queue_len(&self) -> usize {
        match &self.kind {
            Kind::Fifo(queue) => queue.len(),
            Kind::WeightedFair { queues, .. } => {
                queues.iter().map(|queue| queue.len()).sum()
            }
            Kind::StrictPriority(queues) => {
                queues.iter().map(|queue| queue.len()).sum()
            }
        }
    }

    /// Accepts or drops an ingress packet.
    pub fn enqueue(
        &mut self,
        packet: Packet,
        rng: &mut impl Rng,
    ) -> Result<(), DropReason> {
        let class = packet.qos_class();

        // Random early detection runs before the tail-drop check.
        if let Some(red) = self.cfg.red {
            self.red_avg = self.red_avg * (1.0 - RED_EWMA_WEIGHT)
                + self.queue_len() as f64 * RED_EWMA_WEIGHT;
            if self.red_avg >= red.max_threshold as f64 {
                self.drop_stats(&packet, class);
                return Err(DropReason::EarlyDetection);
            }
            if self.red_avg >= red.min_threshold as f64 {
                let span =
                    (red.max_threshold - red.min_threshold) as f64;
                let probability = red.max_probability
                    * (self.red_avg - red.min_threshold as f64)
                    / span;
                if rng.random::<f64>() < probability {
                    self.drop_stats(&packet, class);
                    return Err(DropReason::EarlyDetection);
                }
            }
        }

        if self.queue_len() >= self.cfg.queue_limit {
            self.drop_stats(&packet, class);
            return Err(DropReason::QueueFull);
        }

        match &mut self.kind {
            Kind::Fifo(queue) => queue.push_back(packet),
            Kind::WeightedFair {
                queues,
                virtual_time,
                last_finish,
            } => {
                let idx = class.index();
                let weight = self.cfg.class_weights[idx] as f64;
                let finish = virtual_time.max(last_finish[idx])
                    + packet.len() as f64 / weight;
                last_finish[idx] = finish;
                queues[idx].push_back((finish, packet));
            }
            Kind::StrictPriority(queues) => {
                queues[class.index()].push_back(packet);
            }
        }
        Ok(())
    }

    /// Attempts to release the next packet at shaping rate.
    pub fn dequeue(&mut self, now: Instant) -> Dequeue {
        // Continuous refill computed from elapsed time.
        let elapsed = (now - self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens
            + elapsed * self.cfg.rate_bps as f64 / 8.0)
            .min(self.cfg.burst_bytes as f64);

        let Some(size) = self.peek_size() else {
            return Dequeue::Empty;
        };

        if (size as f64) > self.tokens {
            if self.cfg.rate_bps == 0 {
                // A zero rate never accumulates tokens; the queue drains
                // only through tail drops.
                return Dequeue::Wait(Duration::from_secs(3600));
            }
            let deficit = size as f64 - self.tokens;
            let wait = deficit * 8.0 / self.cfg.rate_bps as f64;
            return Dequeue::Wait(Duration::from_secs_f64(wait));
        }

        let packet = self.pop().unwrap();
        self.tokens -= size as f64;
        let class = packet.qos_class();
        self.stats.packets_processed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_processed
            .fetch_add(packet.len() as u64, Ordering::Relaxed);
        self.stats.per_class_processed[class.index()]
            .fetch_add(1, Ordering::Relaxed);
        Dequeue::Packet(packet)
    }

    // Size of the next packet the scheduler would release.
    fn peek_size(&self) -> Option<usize> {
        match &self.kind {
            Kind::Fifo(queue) => queue.front().map(|packet| packet.len()),
            Kind::WeightedFair { queues, .. } => self
                .wfq_next_class(queues)
                .and_then(|idx| queues[idx].front())
                .map(|(_, packet)| packet.len()),
            Kind::StrictPriority(queues) => queues
                .iter()
                .rev()
                .find_map(|queue| queue.front())
                .map(|packet| packet.len()),
        }
    }

    fn pop(&mut self) -> Option<Packet> {
        match &mut self.kind {
            Kind::Fifo(queue) => queue.pop_front(),
            Kind::WeightedFair {
                queues,
                virtual_time,
                ..
            } => {
                let idx = Self::wfq_next_class_idx(queues)?;
                let (finish, packet) = queues[idx].pop_front()?;
                *virtual_time = finish;
                Some(packet)
            }
            Kind::StrictPriority(queues) => queues
                .iter_mut()
                .rev()
                .find(|queue| !queue.is_empty())
                .and_then(|queue| queue.pop_front()),
        }
    }

    // Class holding the smallest virtual finish time; ties go to the
    // higher class.
    fn wfq_next_class(
        &self,
        queues: &[VecDeque<(f64, Packet)>; QosClass::COUNT],
    ) -> Option<usize> {
        Self::wfq_next_class_idx(queues)
    }

    fn wfq_next_class_idx(
        queues: &[VecDeque<(f64, Packet)>; QosClass::COUNT],
    ) -> Option<usize> {
        queues
            .iter()
            .enumerate()
            .rev()
            .filter_map(|(idx, queue)| {
                queue.front().map(|(finish, _)| (idx, *finish))
            })
            .min_by(|(idx_a, finish_a), (idx_b, finish_b)| {
                finish_a
                    .partial_cmp(finish_b)
                    .unwrap()
                    .then(idx_b.cmp(idx_a))
            })
            .map(|(idx, _)| idx)
    }

    /// Drains every queued packet regardless of tokens (admin-down or
    /// reconfiguration).
    pub fn flush(&mut self) -> Vec<Packet> {
        let mut flushed = vec![];
        while let Some(packet) = self.pop() {
            flushed.push(packet);
        }
        flushed
    }

    fn drop_stats(&self, packet: &Packet, class: QosClass) {
        self.stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_dropped
            .fetch_add(packet.len() as u64, Ordering::Relaxed);
        self.stats.per_class_dropped[class.index()]
            .fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use mimic_utils::packet::IP_PROTO_UDP;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn packet(dscp: u8, payload_len: usize) -> Packet {
        Packet::build_ipv4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 1, 1),
            IP_PROTO_UDP,
            64,
            dscp,
            &vec![0; payload_len],
            "eth0",
            Instant::now(),
        )
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[tokio::test(start_paused = true)]
    async fn token_bucket_paces_to_rate() {
        // 1 Mbit/s, 10 KB burst, 1000-byte packets offered at 10 Mbit/s
        // for 10 seconds.
        let mut cfg = ShaperCfg {
            rate_bps: 1_000_000,
            burst_bytes: 10_000,
            queue_limit: 100,
            ..Default::default()
        };
        cfg.algorithm = ShaperAlgorithm::TokenBucket;
        let mut shaper = Shaper::new(cfg, Instant::now());
        let mut rng = rng();

        let mut processed_bytes = 0u64;
        let mut dropped = 0u64;
        let start = Instant::now();
        for _ in 0..10_000 {
            // 1000-byte packet every 800 microseconds is 10 Mbit/s.
            tokio::time::advance(Duration::from_micros(800)).await;
            if shaper.enqueue(packet(0, 980), &mut rng).is_err() {
                dropped += 1;
            }
            loop {
                match shaper.dequeue(Instant::now()) {
                    Dequeue::Packet(packet) => {
                        processed_bytes += packet.len() as u64;
                    }
                    _ => break,
                }
            }
        }
        let elapsed = (Instant::now() - start).as_secs_f64();

        // Processed bytes track the configured rate within 5%.
        let expected = 1_000_000.0 / 8.0 * elapsed;
        let ratio = processed_bytes as f64 / expected;
        assert!((0.95..=1.05).contains(&ratio), "ratio {ratio}");
        assert!(dropped > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_starves_after_burst() {
        let cfg = ShaperCfg {
            rate_bps: 0,
            burst_bytes: 2_000,
            queue_limit: 2,
            ..Default::default()
        };
        let mut shaper = Shaper::new(cfg, Instant::now());
        let mut rng = rng();

        // The burst allows the first packets out...
        shaper.enqueue(packet(0, 980), &mut rng).unwrap();
        shaper.enqueue(packet(0, 980), &mut rng).unwrap();
        assert!(matches!(
            shaper.dequeue(Instant::now()),
            Dequeue::Packet(_)
        ));
        assert!(matches!(
            shaper.dequeue(Instant::now()),
            Dequeue::Packet(_)
        ));

        // ...then everything blocks and the queue tail-drops.
        shaper.enqueue(packet(0, 980), &mut rng).unwrap();
        shaper.enqueue(packet(0, 980), &mut rng).unwrap();
        assert!(matches!(
            shaper.dequeue(Instant::now()),
            Dequeue::Wait(_)
        ));
        assert_eq!(
            shaper.enqueue(packet(0, 980), &mut rng),
            Err(DropReason::QueueFull)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn strict_priority_serves_highest_class() {
        let cfg = ShaperCfg {
            algorithm: ShaperAlgorithm::StrictPriority,
            rate_bps: 8_000_000,
            burst_bytes: 1_000_000,
            ..Default::default()
        };
        let mut shaper = Shaper::new(cfg, Instant::now());
        let mut rng = rng();

        // Best-effort first, then voice (CS4 -> class index 4).
        shaper.enqueue(packet(0, 100), &mut rng).unwrap();
        shaper.enqueue(packet(32, 100), &mut rng).unwrap();

        let Dequeue::Packet(first) = shaper.dequeue(Instant::now()) else {
            panic!("expected packet");
        };
        assert_eq!(first.qos_class(), QosClass::Voice);
        let Dequeue::Packet(second) = shaper.dequeue(Instant::now()) else {
            panic!("expected packet");
        };
        assert_eq!(second.qos_class(), QosClass::BestEffort);
    }

    #[tokio::test(start_paused = true)]
    async fn wfq_shares_by_weight() {
        // Two classes with a 4:1 weight ratio and equal-size packets.
        let cfg = ShaperCfg {
            algorithm: ShaperAlgorithm::WeightedFair,
            rate_bps: 8_000_000,
            burst_bytes: 1_000_000,
            class_weights: [1, 1, 2, 4, 4, 16, 32, 64],
            ..Default::default()
        };
        let mut shaper = Shaper::new(cfg, Instant::now());
        let mut rng = rng();

        // 10 best-effort (weight 1) and 10 voice (weight 4).
        for _ in 0..10 {
            shaper.enqueue(packet(0, 480), &mut rng).unwrap();
            shaper.enqueue(packet(32, 480), &mut rng).unwrap();
        }

        // Among the first 10 releases, voice should get roughly a 4:1
        // share.
        let mut voice = 0;
        for _ in 0..10 {
            let Dequeue::Packet(packet) = shaper.dequeue(Instant::now())
            else {
                panic!("expected packet");
            };
            if packet.qos_class() == QosClass::Voice {
                voice += 1;
            }
        }
        assert!(voice >= 7, "voice got {voice}/10");
    }

    #[tokio::test(start_paused = true)]
    async fn conservation_of_packets() {
        let cfg = ShaperCfg {
            rate_bps: 1_000_000,
            burst_bytes: 5_000,
            queue_limit: 10,
            ..Default::default()
        };
        let mut shaper = Shaper::new(cfg, Instant::now());
        let mut rng = rng();

        let mut enqueued = 0u64;
        let mut delivered = 0u64;
        for _ in 0..100 {
            enqueued += 1;
            let _ = shaper.enqueue(packet(0, 980), &mut rng);
            if let Dequeue::Packet(_) = shaper.dequeue(Instant::now()) {
                delivered += 1;
            }
        }
        let dropped =
            shaper.stats.packets_dropped.load(Ordering::Relaxed);
        let in_flight = shaper.queue_len() as u64;
        assert_eq!(enqueued, delivered + dropped + in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn red_drops_probabilistically_between_thresholds() {
        let cfg = ShaperCfg {
            rate_bps: 0,
            burst_bytes: 0,
            queue_limit: 10_000,
            red: Some(RedCfg {
                min_threshold: 10,
                max_threshold: 50,
                max_probability: 1.0,
            }),
            ..Default::default()
        };
        let mut shaper = Shaper::new(cfg, Instant::now());
        let mut rng = rng();

        // With a zero rate, the queue only grows; once the average crosses
        // the thresholds, early drops must appear well before the queue
        // limit.
        let mut early_drops = 0;
        for _ in 0..10_000 {
            if shaper.enqueue(packet(0, 100), &mut rng)
                == Err(DropReason::EarlyDetection)
            {
                early_drops += 1;
            }
        }
        assert!(early_drops > 0);
        assert!(shaper.queue_len() < 10_000);
    }
}
