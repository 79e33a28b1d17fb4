//! Parameter storage shared between the graph and the optimizer.
//!
//! Every parameter node owns a flat Burn [`Param`] behind an
//! `Rc<RefCell<_>>` handle. Binding two models makes them hold the same
//! handle; copying gives the receiver a fresh handle with equal values.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::rc::Rc;

use burn::module::{Module, Param};
use burn::tensor::{Distribution, Tensor, backend::Backend};

use crate::errors::ModelError;
use crate::graph::{Init, Node, NodeId, Value};
use crate::tensor::{DType, HostTensor};

/// Shared storage of one parameter, flattened to rank 1.
pub type ParamHandle<B> = Rc<RefCell<Param<Tensor<B, 1>>>>;

/// Trainable parameters in the form Burn optimizers step over.
#[derive(Module, Debug)]
pub struct ParamStore<B: Backend> {
    pub(crate) params: Vec<Param<Tensor<B, 1>>>,
}

/// One parameter of a built model.
#[derive(Debug, Clone)]
pub(crate) struct ParamSlot<B: Backend> {
    /// `layer:param`, e.g. `hidden:weights`.
    pub key: String,
    pub node: Node,
    pub trainable: bool,
    pub handle: ParamHandle<B>,
}

impl<B: Backend> ParamSlot<B> {
    /// Allocates storage for `node` and initialises it.
    pub fn new(
        key: String,
        node: Node,
        init: Init,
        trainable: bool,
        device: &B::Device,
    ) -> Self {
        let volume = node.volume();
        let tensor = match init {
            Init::Zeros => Tensor::<B, 1>::zeros([volume], device),
            Init::GlorotNormal { .. } => Tensor::<B, 1>::random(
                [volume],
                Distribution::Normal(0.0, init.std(node.shape())),
                device,
            ),
        };
        Self {
            key,
            node,
            trainable,
            handle: Rc::new(RefCell::new(Param::from_tensor(tensor))),
        }
    }

    /// Current value shaped like the node. Frozen parameters are detached
    /// so no gradient reaches them.
    pub fn value(&self) -> Result<Value<B>, ModelError> {
        let tensor = self.handle.borrow().val();
        let tensor = if self.trainable {
            tensor
        } else {
            tensor.detach()
        };
        Value::R1(tensor).reshape(self.node.shape())
    }

    pub fn to_host(&self) -> Result<HostTensor, ModelError> {
        let tensor = self.handle.borrow().val().detach();
        Value::R1(tensor)
            .reshape(self.node.shape())?
            .to_host(DType::Float)
    }

    /// Overwrites the stored values in place, keeping the parameter id so
    /// optimizer state and bound models follow along.
    pub fn assign(&self, host: &HostTensor) -> Result<(), ModelError> {
        if host.shape() != self.node.shape() {
            return Err(ModelError::ShapeMismatch {
                name: self.key.clone(),
                expected: self.node.shape().to_vec(),
                actual: host.shape().to_vec(),
            });
        }
        let device = self.handle.borrow().val().device();
        let flat = Value::<B>::from_host(host, &device)?
            .reshape(&[host.len()])?
            .into_rank1()?;
        let mut param = self.handle.borrow_mut();
        let id = param.id;
        *param = Param::initialized(id, flat.require_grad());
        Ok(())
    }

    fn check_same_shape(&self, other: &ParamSlot<B>) -> Result<(), ModelError> {
        if self.node.shape() != other.node.shape() {
            return Err(ModelError::ShapeMismatch {
                name: self.key.clone(),
                expected: self.node.shape().to_vec(),
                actual: other.node.shape().to_vec(),
            });
        }
        Ok(())
    }
}

/// All parameters of a built model, in layer order.
#[derive(Debug, Clone)]
pub(crate) struct ParamSet<B: Backend> {
    slots: Vec<ParamSlot<B>>,
}

impl<B: Backend> ParamSet<B> {
    pub fn new(slots: Vec<ParamSlot<B>>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Values for every parameter node, keyed by node id.
    pub fn values(&self) -> Result<HashMap<NodeId, Value<B>>, ModelError> {
        self.slots
            .iter()
            .map(|slot| Ok((slot.node.id(), slot.value()?)))
            .collect()
    }

    /// Values detached from any autodiff graph, for inference.
    pub fn detached_values(&self) -> Result<HashMap<NodeId, Value<B>>, ModelError> {
        self.slots
            .iter()
            .map(|slot| {
                let tensor = slot.handle.borrow().val().detach();
                let value = Value::R1(tensor).reshape(slot.node.shape())?;
                Ok((slot.node.id(), value))
            })
            .collect()
    }

    pub fn trainable_handles(&self) -> Vec<ParamHandle<B>> {
        self.slots
            .iter()
            .filter(|slot| slot.trainable)
            .map(|slot| slot.handle.clone())
            .collect()
    }

    pub fn get(&self) -> Result<BTreeMap<String, HostTensor>, ModelError> {
        self.slots
            .iter()
            .map(|slot| Ok((slot.key.clone(), slot.to_host()?)))
            .collect()
    }

    /// Assigns every parameter with a matching key. Other keys are ignored.
    pub fn set(&self, params: &BTreeMap<String, HostTensor>) -> Result<(), ModelError> {
        for slot in &self.slots {
            if let Some(host) = params.get(&slot.key) {
                slot.assign(host)?;
            }
        }
        Ok(())
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<(), ModelError> {
        serde_json::to_writer(writer, &self.get()?)?;
        Ok(())
    }

    pub fn read<R: Read>(&self, reader: R) -> Result<(), ModelError> {
        let params: BTreeMap<String, HostTensor> = serde_json::from_reader(reader)?;
        self.set(&params)
    }

    /// Shares storage with every parameter of `source` that has the same key.
    pub fn bind_from(&mut self, source: &ParamSet<B>) -> Result<usize, ModelError> {
        let mut bound = 0;
        for slot in &mut self.slots {
            if let Some(other) = source.slots.iter().find(|o| o.key == slot.key) {
                slot.check_same_shape(other)?;
                slot.handle = other.handle.clone();
                bound += 1;
            }
        }
        Ok(bound)
    }

    /// Takes private copies of every parameter of `source` with the same key.
    pub fn copy_from(&mut self, source: &ParamSet<B>) -> Result<usize, ModelError> {
        let mut copied = 0;
        for slot in &mut self.slots {
            if let Some(other) = source.slots.iter().find(|o| o.key == slot.key) {
                slot.check_same_shape(other)?;
                let value = other.handle.borrow().val().detach();
                slot.handle = Rc::new(RefCell::new(Param::from_tensor(value)));
                copied += 1;
            }
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn slot(graph: &mut Graph, key: &str, shape: &[usize]) -> ParamSlot<TestBackend> {
        let node = graph.parameter(key, shape, Init::default()).unwrap();
        ParamSlot::new(
            key.to_string(),
            node,
            Init::default(),
            true,
            &Default::default(),
        )
    }

    #[test]
    fn test_zeros_init() {
        let mut graph = Graph::new();
        let node = graph.parameter("w", &[2, 3], Init::Zeros).unwrap();
        let slot = ParamSlot::<TestBackend>::new(
            "l:w".into(),
            node,
            Init::Zeros,
            true,
            &Default::default(),
        );
        let host = slot.to_host().unwrap();
        assert_eq!(host.shape(), &[2, 3]);
        assert!(host.to_f64_vec().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_set_keeps_id_and_checks_shape() {
        let mut graph = Graph::new();
        let slot = slot(&mut graph, "l:w", &[2, 2]);
        let id = slot.handle.borrow().id;

        let values = HostTensor::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        slot.assign(&values).unwrap();
        assert_eq!(slot.handle.borrow().id, id);
        assert_eq!(slot.to_host().unwrap().to_f64_vec(), vec![1.0, 2.0, 3.0, 4.0]);

        let wrong = HostTensor::from_vec(&[1.0, 2.0]).unwrap();
        assert!(matches!(
            slot.assign(&wrong).unwrap_err(),
            ModelError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn test_bind_shares_and_copy_duplicates() {
        let mut graph = Graph::new();
        let source = ParamSet::new(vec![slot(&mut graph, "l:w", &[2])]);
        let mut bound = ParamSet::new(vec![slot(&mut graph, "l:w", &[2])]);
        let mut copied = ParamSet::new(vec![slot(&mut graph, "l:w", &[2])]);

        assert_eq!(bound.bind_from(&source).unwrap(), 1);
        assert_eq!(copied.copy_from(&source).unwrap(), 1);

        let values = HostTensor::from_vec(&[5.0, 6.0]).unwrap();
        let update = BTreeMap::from([("l:w".to_string(), values)]);
        source.set(&update).unwrap();

        assert_eq!(bound.get().unwrap()["l:w"].to_f64_vec(), vec![5.0, 6.0]);
        assert_ne!(copied.get().unwrap()["l:w"].to_f64_vec(), vec![5.0, 6.0]);
    }

    #[test]
    fn test_unmatched_keys_are_ignored() {
        let mut graph = Graph::new();
        let set = ParamSet::new(vec![slot(&mut graph, "l:w", &[2])]);
        let before = set.get().unwrap();
        let values = HostTensor::from_vec(&[1.0]).unwrap();
        let other = BTreeMap::from([("other:w".to_string(), values)]);
        set.set(&other).unwrap();
        assert_eq!(set.get().unwrap(), before);
    }

    #[test]
    fn test_write_then_read() {
        let mut graph = Graph::new();
        let source = ParamSet::new(vec![slot(&mut graph, "l:w", &[3])]);
        let target = ParamSet::new(vec![slot(&mut graph, "l:w", &[3])]);
        let mut buffer = Vec::new();
        source.write(&mut buffer).unwrap();
        target.read(buffer.as_slice()).unwrap();
        assert_eq!(source.get().unwrap(), target.get().unwrap());
    }
}
